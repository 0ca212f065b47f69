mod app;
mod augment;
mod backup;
mod config;
mod embedding;
mod ingest;
mod lifecycle;
mod models;
mod routes;
mod vector_store;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use app::AppState;
use augment::{Augmenter, StandardAugmenter};
use backup::BackupManager;
use backup::pg_cli::{DbParams, PgCliTool};
use config::load_settings_from_path;
use embedding::api::ApiImageEmbedder;
use ingest::{IngestPipeline, IngestSettings, RetryPolicy};
use lifecycle::{Lifecycle, StartupOutcome};
use vector_store::VectorStore;
use vector_store::pgvector::{PgVectorConfig, PgVectorStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting imgvec server...");

    // Load configuration.
    let config_path = std::env::var("IMGVEC_CONFIG").unwrap_or_else(|_| "imgvec.toml".to_string());
    let settings = load_settings_from_path(&config_path)?;
    info!(
        "Configuration loaded: environment={}, host={}, port={}",
        settings.environment, settings.host, settings.port
    );

    std::fs::create_dir_all(&settings.upload_dir)?;
    std::fs::create_dir_all(&settings.backup_dir)?;

    // Vector store; the pool is opened by the lifecycle.
    let store: Arc<dyn VectorStore> = Arc::new(PgVectorStore::new(PgVectorConfig {
        uri: settings.database_url.clone(),
        min_connections: settings.min_connections,
        max_connections: settings.max_connections,
        acquire_timeout: settings.acquire_timeout,
        dimensions: settings.vector_dimensions,
        hnsw_ef_search: settings.hnsw_ef_search,
    }));

    // Backup tooling.
    let db_params = DbParams::from_url(&vector_store::pgvector::normalize_uri(&settings.database_url))?;
    let tool = PgCliTool::new(db_params).with_binaries(&settings.pg_dump, &settings.pg_restore);
    let backups = Arc::new(BackupManager::new(&settings.backup_dir, Arc::new(tool)));
    info!("Backups stored in {}", backups.backup_dir().display());

    // Restore the latest backup or initialise an empty store.
    let lifecycle = Arc::new(Lifecycle::new(store.clone(), backups));
    match lifecycle.startup().await? {
        StartupOutcome::Fresh => info!("Vector store initialized"),
        StartupOutcome::Restored(path) => info!("Vector store restored from {}", path.display()),
        StartupOutcome::FallbackFresh { backup, error } => warn!(
            "Started with an empty store; restore from {} failed: {error}",
            backup.display()
        ),
    }

    // Embedding model and ingestion pipeline.
    let embedder = Arc::new(ApiImageEmbedder::new(
        &settings.embedding_api_url,
        settings.vector_dimensions as usize,
        settings.embedding_timeout,
    ));
    info!("Embedding model initialized: {}", settings.embedding_api_url);

    let augmenter = Arc::new(StandardAugmenter::default());
    info!("Augmenter produces {} variants per image", augmenter.variant_count());

    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        embedder,
        augmenter,
        IngestSettings {
            upload_root: settings.upload_dir.clone(),
            image_exts: settings.image_exts.clone(),
            batch_size: settings.batch_size,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                initial_delay: settings.retry_delay,
            },
        },
    ));

    // Build application state.
    let shutdown = CancellationToken::new();
    let jobs = TaskTracker::new();
    let state = Arc::new(AppState {
        settings: settings.clone(),
        store,
        pipeline,
        lifecycle: lifecycle.clone(),
        shutdown: shutdown.clone(),
        jobs: jobs.clone(),
    });

    // Build router.
    let app = routes::build_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server.
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // Cancelled jobs flush their last batch before returning.
    jobs.close();
    info!("Waiting for {} background job(s) to stop", jobs.len());
    jobs.wait().await;

    if let Err(e) = lifecycle.shutdown().await {
        error!("Error closing vector store: {e}");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C and cancel background jobs.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
