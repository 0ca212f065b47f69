use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ──────────────────────────── TOML structure ────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct TomlConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_min_connections() -> u32 {
    5
}
fn default_max_connections() -> u32 {
    20
}
fn default_acquire_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dimensions")]
    pub dimensions: u32,
    pub api_url: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_dimensions() -> u32 {
    768
}
fn default_embedding_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_image_exts")]
    pub image_exts: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            image_exts: default_image_exts(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_image_exts() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_ef_search")]
    pub hnsw_ef_search: u32,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            hnsw_ef_search: default_ef_search(),
        }
    }
}

fn default_ef_search() -> u32 {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            backup_dir: default_backup_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("/app/uploads")
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from("/app/backups")
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_pg_dump")]
    pub pg_dump: String,
    #[serde(default = "default_pg_restore")]
    pub pg_restore: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            pg_dump: default_pg_dump(),
            pg_restore: default_pg_restore(),
        }
    }
}

fn default_pg_dump() -> String {
    "pg_dump".to_string()
}
fn default_pg_restore() -> String {
    "pg_restore".to_string()
}

// ──────────────────────────── Resolved Settings ────────────────────────────

/// Flat settings structure resolved from TOML + environment variables.
#[derive(Clone)]
pub struct Settings {
    // API
    pub host: String,
    pub port: u16,

    // Service
    pub environment: String,

    // Database
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,

    // Embedding
    pub vector_dimensions: u32,
    pub embedding_api_url: String,
    pub embedding_timeout: Duration,

    // Ingest
    pub image_exts: Vec<String>,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,

    // Vector store
    pub hnsw_ef_search: u32,

    // Paths
    pub upload_dir: PathBuf,
    pub backup_dir: PathBuf,

    // Backup tools
    pub pg_dump: String,
    pub pg_restore: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("database_url", &"<redacted>")
            .field("vector_dimensions", &self.vector_dimensions)
            .field("embedding_api_url", &self.embedding_api_url)
            .field("batch_size", &self.batch_size)
            .field("upload_dir", &self.upload_dir)
            .field("backup_dir", &self.backup_dir)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Resolve parsed TOML plus the database URL into validated settings.
    pub fn from_config(config: TomlConfig, database_url: String) -> anyhow::Result<Self> {
        if config.embedding.dimensions == 0 {
            anyhow::bail!("embedding.dimensions must be positive");
        }
        if config.ingest.batch_size == 0 {
            anyhow::bail!("ingest.batch_size must be positive");
        }
        if config.ingest.max_attempts == 0 {
            anyhow::bail!("ingest.max_attempts must be at least 1");
        }
        if !(1..=1000).contains(&config.vector_store.hnsw_ef_search) {
            anyhow::bail!(
                "vector_store.hnsw_ef_search must be between 1 and 1000, got {}",
                config.vector_store.hnsw_ef_search
            );
        }
        if config.database.min_connections > config.database.max_connections {
            anyhow::bail!(
                "database.min_connections ({}) exceeds max_connections ({})",
                config.database.min_connections,
                config.database.max_connections
            );
        }

        Ok(Settings {
            host: config.api.host,
            port: config.api.port,
            environment: config.service.environment,
            database_url,
            min_connections: config.database.min_connections,
            max_connections: config.database.max_connections,
            acquire_timeout: Duration::from_secs(config.database.acquire_timeout_secs),
            vector_dimensions: config.embedding.dimensions,
            embedding_api_url: config.embedding.api_url,
            embedding_timeout: Duration::from_secs(config.embedding.timeout_secs),
            image_exts: config.ingest.image_exts,
            batch_size: config.ingest.batch_size,
            max_attempts: config.ingest.max_attempts,
            retry_delay: Duration::from_millis(config.ingest.retry_delay_ms),
            hnsw_ef_search: config.vector_store.hnsw_ef_search,
            upload_dir: config.paths.upload_dir,
            backup_dir: config.paths.backup_dir,
            pg_dump: config.backup.pg_dump,
            pg_restore: config.backup.pg_restore,
        })
    }
}

/// Load settings from a given TOML path plus `DATABASE_URL`.
pub fn load_settings_from_path(path: impl AsRef<Path>) -> anyhow::Result<Settings> {
    // Load .env if present (ignore errors)
    let _ = dotenvy::dotenv();

    let content = std::fs::read_to_string(path.as_ref())?;
    let config: TomlConfig = toml::from_str(&content)?;

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

    Settings::from_config(config, database_url)
}
