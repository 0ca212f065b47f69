pub mod pg_cli;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::vector_store::StoreError;

/// File extensions recognised as backup artifacts.
pub const BACKUP_EXTENSIONS: [&str; 2] = ["dump", "sql"];

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup file not found: {0}")]
    NotFound(PathBuf),
    #[error("No backup files available")]
    NoBackups,
    #[error("Invalid backup file name: {0}")]
    InvalidName(String),
    #[error("Backup failed: {0}")]
    BackupFailed(String),
    #[error("Restore failed: {0}")]
    RestoreFailed(String),
    #[error("Service not ready: {0}")]
    NotReady(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Backup I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// External dump/restore process for the whole database.
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Write a full dump to `target`.
    async fn dump(&self, target: &Path) -> Result<(), BackupError>;

    /// Replace the database contents with the dump at `source`. Callers must
    /// close the connection pool first.
    async fn restore(&self, source: &Path) -> Result<(), BackupError>;
}

/// Backup artifacts under one directory.
pub struct BackupManager {
    backup_dir: PathBuf,
    tool: Arc<dyn BackupTool>,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, tool: Arc<dyn BackupTool>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            tool,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Timestamped name for a new backup.
    pub fn generate_name() -> String {
        format!("backup_{}.dump", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
    }

    /// Plain file names only; anything that could leave the backup
    /// directory is rejected.
    pub fn validate_name(name: &str) -> Result<(), BackupError> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
            || name.starts_with('.');
        if invalid {
            return Err(BackupError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Path of an existing backup named `name`.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, BackupError> {
        Self::validate_name(name)?;
        let path = self.backup_dir.join(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(BackupError::NotFound(path)),
        }
    }

    /// Most recently modified backup artifact, if any.
    pub async fn latest_backup(&self) -> Result<Option<PathBuf>, BackupError> {
        let mut entries = match fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_backup = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| BACKUP_EXTENSIONS.contains(&e));
            if !is_backup {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified()?;
            if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
                latest = Some((modified, path));
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    /// Dump the database to `name` (or a generated name) and return the
    /// written path.
    pub async fn create(&self, name: Option<String>) -> Result<PathBuf, BackupError> {
        let name = name.unwrap_or_else(Self::generate_name);
        Self::validate_name(&name)?;
        fs::create_dir_all(&self.backup_dir).await?;

        let target = self.backup_dir.join(&name);
        // Dotted and suffixed so `latest_backup` never picks up a partial dump.
        let partial = self.backup_dir.join(format!(".{name}.partial"));
        info!("Starting database backup to {}", target.display());
        if let Err(e) = self.tool.dump(&partial).await {
            if let Err(rm_err) = fs::remove_file(&partial).await {
                if rm_err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove partial backup {}: {rm_err}", partial.display());
                }
            }
            return Err(e);
        }
        fs::rename(&partial, &target).await?;
        info!("Backup complete: {}", target.display());
        Ok(target)
    }

    /// Run the restore tool against `source`. Pool handling is the caller's.
    pub async fn restore_from(&self, source: &Path) -> Result<(), BackupError> {
        info!("Starting database restore from {}", source.display());
        self.tool.restore(source).await?;
        info!("Restore complete: {}", source.display());
        Ok(())
    }
}
