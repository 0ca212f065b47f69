use serde::{Deserialize, Serialize};

/// A stored image row as returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i32,
    pub filename: String,
    /// Logical path relative to the upload root; unique across the store.
    pub filepath: String,
}

/// A search hit, scored by cosine similarity (`1 - cosine distance`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarImage {
    pub id: i32,
    pub filename: String,
    pub filepath: String,
    pub similarity: f64,
}

/// A record waiting to be written by a batch insert.
#[derive(Debug, Clone)]
pub struct NewImageRecord {
    pub filename: String,
    pub filepath: String,
    pub embedding: Vec<f32>,
}

impl NewImageRecord {
    pub fn new(filename: impl Into<String>, filepath: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            filename: filename.into(),
            filepath: filepath.into(),
            embedding,
        }
    }
}

/// Logical path of an augmented variant. The unmodified original keeps the
/// plain relative path; derived variants get a `#<name>` suffix.
pub fn variant_filepath(relative_path: &str, variant: &str) -> String {
    if variant == crate::augment::ORIGINAL {
        relative_path.to_string()
    } else {
        format!("{relative_path}#{variant}")
    }
}
