pub mod api;

use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Embedding API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Malformed embedding response: {0}")]
    Decode(String),
}

/// Maps an image to a fixed-length feature vector.
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn generate(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbeddingError>;

    /// Return the embedding dimensions.
    fn dimensions(&self) -> usize;
}
