use crate::models::image::NewImageRecord;
use crate::vector_store::StoreError;

/// Render an embedding as a pgvector text literal, e.g. `[0.1,0.2]`.
pub fn vector_literal(values: &[f32]) -> String {
    format!(
        "[{}]",
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Reject a batch that contains a vector of the wrong length before it
/// reaches the database.
pub fn check_dimensions(records: &[NewImageRecord], expected: usize) -> Result<(), StoreError> {
    match records.iter().find(|r| r.embedding.len() != expected) {
        Some(bad) => Err(StoreError::DimensionMismatch {
            expected,
            actual: bad.embedding.len(),
        }),
        None => Ok(()),
    }
}

/// Split a batch into parallel column arrays for an `UNNEST` insert.
pub fn batch_columns(records: &[NewImageRecord]) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut filenames = Vec::with_capacity(records.len());
    let mut filepaths = Vec::with_capacity(records.len());
    let mut embeddings = Vec::with_capacity(records.len());
    for record in records {
        filenames.push(record.filename.clone());
        filepaths.push(record.filepath.clone());
        embeddings.push(vector_literal(&record.embedding));
    }
    (filenames, filepaths, embeddings)
}
