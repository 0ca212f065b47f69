use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Settings;
use crate::ingest::IngestPipeline;
use crate::lifecycle::Lifecycle;
use crate::vector_store::VectorStore;

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn VectorStore>,
    pub pipeline: Arc<IngestPipeline>,
    pub lifecycle: Arc<Lifecycle>,
    /// Cancelled on process shutdown; background jobs take child tokens.
    pub shutdown: CancellationToken,
    /// Background ingest jobs, drained before the pool is closed.
    pub jobs: TaskTracker,
}

#[cfg(test)]
pub mod testing {
    //! Application state wired to in-memory collaborators.

    use async_trait::async_trait;
    use image::DynamicImage;
    use std::path::Path;
    use tempfile::TempDir;

    use super::*;
    use crate::augment::{Augmenter, ORIGINAL, Variant};
    use crate::backup::{BackupError, BackupManager, BackupTool};
    use crate::config::TomlConfig;
    use crate::embedding::{EmbeddingError, ImageEmbedder};
    use crate::ingest::{IngestSettings, RetryPolicy};
    use crate::vector_store::memory::MemoryStore;

    pub const DIMENSIONS: usize = 3;

    /// Embeds an image as the mean of its RGB channels.
    pub struct MeanColorEmbedder;

    #[async_trait]
    impl ImageEmbedder for MeanColorEmbedder {
        async fn generate(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbeddingError> {
            let rgb = image.to_rgb8();
            let n = (rgb.width() * rgb.height()).max(1) as f32;
            let mut sum = [0f32; 3];
            for px in rgb.pixels() {
                for (s, c) in sum.iter_mut().zip(px.0) {
                    *s += c as f32;
                }
            }
            Ok(sum.iter().map(|s| s / n + 1.0).collect())
        }

        fn dimensions(&self) -> usize {
            DIMENSIONS
        }
    }

    pub struct OriginalOnly;

    impl Augmenter for OriginalOnly {
        fn augment(&self, image: &DynamicImage) -> Vec<Variant> {
            vec![Variant {
                name: ORIGINAL,
                image: image.clone(),
            }]
        }

        fn variant_count(&self) -> usize {
            1
        }
    }

    pub struct TouchTool;

    #[async_trait]
    impl BackupTool for TouchTool {
        async fn dump(&self, target: &Path) -> Result<(), BackupError> {
            tokio::fs::write(target, b"PGDMP").await?;
            Ok(())
        }

        async fn restore(&self, _source: &Path) -> Result<(), BackupError> {
            Ok(())
        }
    }

    pub struct TestApp {
        pub dir: TempDir,
        pub store: Arc<MemoryStore>,
        pub state: Arc<AppState>,
    }

    /// A started application over an empty in-memory store.
    pub async fn test_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let upload_dir = dir.path().join("uploads");
        let backup_dir = dir.path().join("backups");
        std::fs::create_dir_all(&upload_dir).unwrap();
        std::fs::create_dir_all(&backup_dir).unwrap();

        let config: TomlConfig = toml::from_str(&format!(
            r#"
[api]
host = "127.0.0.1"
port = 0

[service]
environment = "test"

[embedding]
dimensions = {DIMENSIONS}
api_url = "http://127.0.0.1:1"

[ingest]
retry_delay_ms = 1

[paths]
upload_dir = "{}"
backup_dir = "{}"
"#,
            upload_dir.display(),
            backup_dir.display()
        ))
        .unwrap();
        let settings = Settings::from_config(config, "postgresql://t:t@localhost/t".to_string()).unwrap();

        let store = Arc::new(MemoryStore::new(DIMENSIONS));
        let backups = Arc::new(BackupManager::new(&backup_dir, Arc::new(TouchTool)));
        let lifecycle = Arc::new(Lifecycle::new(store.clone(), backups));
        lifecycle.startup().await.unwrap();

        let pipeline = Arc::new(IngestPipeline::new(
            store.clone(),
            Arc::new(MeanColorEmbedder),
            Arc::new(OriginalOnly),
            IngestSettings {
                upload_root: upload_dir,
                image_exts: settings.image_exts.clone(),
                batch_size: settings.batch_size,
                retry: RetryPolicy {
                    max_attempts: settings.max_attempts,
                    initial_delay: settings.retry_delay,
                },
            },
        ));

        let state = Arc::new(AppState {
            settings,
            store: store.clone(),
            pipeline,
            lifecycle,
            shutdown: CancellationToken::new(),
            jobs: TaskTracker::new(),
        });
        TestApp { dir, store, state }
    }
}
