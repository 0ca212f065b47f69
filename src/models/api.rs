use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecyclePhase;
use crate::models::image::{ImageRecord, SimilarImage};
use crate::vector_store::pool::PoolPhase;

// ──────────────────────────── Images ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProcessFolderRequest {
    /// Folder path relative to the upload root.
    pub folder: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessFolderResponse {
    pub message: String,
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingSearchRequest {
    pub embedding: Vec<f32>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

pub fn default_top_k() -> usize {
    5
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_filename: Option<String>,
    pub similar_images: Vec<SimilarImage>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct ListImagesResponse {
    pub images: Vec<ImageRecord>,
}

// ──────────────────────────── Database ────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct BackupParams {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub message: String,
    pub backup_file: String,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub message: String,
    pub restored_from: String,
}

// ──────────────────────────── Health ────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub phase: LifecyclePhase,
    pub pool: PoolPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<i64>,
}
