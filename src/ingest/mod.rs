//! Folder ingestion: scan, augment, embed, and batch-insert.
//!
//! Failures on a single image (unreadable file, embedder failure, wrong
//! vector length) skip that image only. A failed batch insert aborts the job.

pub mod scan;

use image::DynamicImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::augment::Augmenter;
use crate::embedding::{EmbeddingError, ImageEmbedder};
use crate::models::image::{NewImageRecord, variant_filepath};
use crate::vector_store::{StoreError, VectorStore};

/// Per-job counters, exposed through logs and the job result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Image files found by the scan.
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    /// Rows newly written; duplicates skipped by the store are not counted.
    pub inserted: u64,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Batch insert failed: {0}")]
    Store(#[from] StoreError),
    #[error("Ingestion cancelled")]
    Cancelled(IngestReport),
    #[error("Folder scan failed: {0}")]
    Scan(String),
}

/// Bounded retry for embedder calls: `max_attempts` tries in total with the
/// delay doubling after each failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub upload_root: PathBuf,
    /// Lowercase, dot-prefixed extensions.
    pub image_exts: Vec<String>,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

/// Run a directory walk on the blocking pool. A panicked walk is an error,
/// not an empty folder.
async fn run_scan<F>(scan: F) -> Result<Vec<PathBuf>, IngestError>
where
    F: FnOnce() -> Vec<PathBuf> + Send + 'static,
{
    tokio::task::spawn_blocking(scan)
        .await
        .map_err(|e| IngestError::Scan(e.to_string()))
}

pub struct IngestPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn ImageEmbedder>,
    augmenter: Arc<dyn Augmenter>,
    settings: IngestSettings,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn ImageEmbedder>,
        augmenter: Arc<dyn Augmenter>,
        mut settings: IngestSettings,
    ) -> Self {
        settings.image_exts = scan::normalize_extensions(&settings.image_exts);
        settings.batch_size = settings.batch_size.max(1);
        settings.retry.max_attempts = settings.retry.max_attempts.max(1);
        Self {
            store,
            embedder,
            augmenter,
            settings,
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.settings.upload_root
    }

    /// Embed every image under `folder` and store the results.
    pub async fn process_folder(
        &self,
        folder: &Path,
        cancel: &CancellationToken,
    ) -> Result<IngestReport, IngestError> {
        if !folder.is_dir() {
            return Err(IngestError::NotADirectory(folder.to_path_buf()));
        }

        let start = Instant::now();
        let files = {
            let folder = folder.to_path_buf();
            let exts = self.settings.image_exts.clone();
            run_scan(move || scan::scan_images(&folder, &exts)).await?
        };

        let mut report = IngestReport {
            total: files.len(),
            ..Default::default()
        };
        info!("Found {} images to process in {}", report.total, folder.display());

        let mut buffer: Vec<NewImageRecord> = Vec::with_capacity(self.settings.batch_size);
        for (i, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                report.inserted += self.flush(&mut buffer).await?;
                warn!("Ingestion of {} cancelled", folder.display());
                return Err(IngestError::Cancelled(report));
            }

            match self.embed_file(file).await {
                Ok(records) => {
                    buffer.extend(records);
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Skipping {} due to error: {e:#}", file.display());
                    report.skipped += 1;
                    continue;
                }
            }

            if buffer.len() >= self.settings.batch_size {
                report.inserted += self.flush(&mut buffer).await?;
            }
            info!("Processed {}/{}: {}", i + 1, report.total, file.display());
        }

        report.inserted += self.flush(&mut buffer).await?;

        info!(
            "Folder processing complete in {:.1}s: total={}, succeeded={}, skipped={}, inserted={}",
            start.elapsed().as_secs_f64(),
            report.total,
            report.succeeded,
            report.skipped,
            report.inserted
        );
        Ok(report)
    }

    async fn flush(&self, buffer: &mut Vec<NewImageRecord>) -> Result<u64, StoreError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        info!("Inserting batch of {} embeddings", buffer.len());
        let inserted = self.store.insert_batch(buffer).await?;
        buffer.clear();
        Ok(inserted)
    }

    /// Decode, augment and embed one file into records for every variant.
    async fn embed_file(&self, file: &Path) -> anyhow::Result<Vec<NewImageRecord>> {
        let variants = {
            let path = file.to_path_buf();
            let augmenter = self.augmenter.clone();
            tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
                let image = image::open(&path)?;
                Ok(augmenter.augment(&image))
            })
            .await??
        };

        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_path = scan::logical_path(file, &self.settings.upload_root);
        let expected = self.store.dimensions();

        let mut records = Vec::with_capacity(variants.len());
        for variant in variants {
            let embedding = self.embed_with_retry(&variant.image).await?;
            if embedding.len() != expected {
                anyhow::bail!(
                    "embedding for variant {} has {} dimensions, store expects {expected}",
                    variant.name,
                    embedding.len()
                );
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                anyhow::bail!("embedding for variant {} has non-finite values", variant.name);
            }
            records.push(NewImageRecord::new(
                filename.clone(),
                variant_filepath(&relative_path, variant.name),
                embedding,
            ));
        }
        Ok(records)
    }

    /// Call the embedder under the configured retry policy.
    pub async fn embed_with_retry(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbeddingError> {
        let policy = &self.settings.retry;
        let mut delay = policy.initial_delay;
        let mut attempt = 1;
        loop {
            match self.embedder.generate(image).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) if attempt < policy.max_attempts => {
                    warn!(
                        "Embedding attempt {attempt}/{} failed: {e}; retrying in {delay:?}",
                        policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
