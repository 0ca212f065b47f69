#[cfg(test)]
pub mod memory;
pub mod pgvector;
pub mod pool;
pub mod utils;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::image::{ImageRecord, NewImageRecord, SimilarImage};
use pool::PoolPhase;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Pool absent or database unreachable. Retry after `bootstrap()`.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Database(other),
        }
    }
}

/// Durable storage of image embeddings with similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ensure the extension, the pool, the table and the cosine index exist.
    /// Safe to call repeatedly.
    async fn bootstrap(&self) -> Result<(), StoreError>;

    /// Insert a batch in one round trip, skipping rows whose filepath already
    /// exists. Returns the number of rows actually inserted.
    async fn insert_batch(&self, records: &[NewImageRecord]) -> Result<u64, StoreError>;

    /// Up to `top_k` rows by ascending cosine distance to `query`.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SimilarImage>, StoreError>;

    /// Page through rows by ascending id.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<ImageRecord>, StoreError>;

    /// Total number of stored rows.
    async fn count(&self) -> Result<i64, StoreError>;

    /// Drain and release the pool.
    async fn shutdown(&self) -> Result<(), StoreError>;

    fn pool_phase(&self) -> PoolPhase;

    /// Fixed vector dimension of the embedding column.
    fn dimensions(&self) -> usize;
}
