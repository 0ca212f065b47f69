//! Startup, restore, backup and shutdown of the storage layer.
//!
//! Transitions are serialised. A restore closes the connection pool (waiting
//! for in-flight operations) before the restore process runs, and bootstraps
//! a fresh pool afterwards.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backup::{BackupError, BackupManager};
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Cold,
    FreshInit,
    Restoring,
    Ready,
    /// A restore or bootstrap failed; no pool is held.
    Failed,
}

impl LifecyclePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecyclePhase::FreshInit,
            2 => LifecyclePhase::Restoring,
            3 => LifecyclePhase::Ready,
            4 => LifecyclePhase::Failed,
            _ => LifecyclePhase::Cold,
        }
    }
}

/// How startup reached `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    Fresh,
    Restored(PathBuf),
    /// Restoring `backup` failed and the store was initialised empty instead.
    FallbackFresh { backup: PathBuf, error: String },
}

pub struct Lifecycle {
    store: Arc<dyn VectorStore>,
    backups: Arc<BackupManager>,
    transition: Mutex<()>,
    phase: AtomicU8,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn VectorStore>, backups: Arc<BackupManager>) -> Self {
        Self {
            store,
            backups,
            transition: Mutex::new(()),
            phase: AtomicU8::new(LifecyclePhase::Cold as u8),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        info!("Lifecycle phase: {:?}", phase);
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Restore the latest backup if there is one, otherwise initialise an
    /// empty store. A failed startup restore falls back to fresh init.
    pub async fn startup(&self) -> Result<StartupOutcome, BackupError> {
        let _guard = self.transition.lock().await;

        let latest = match self.backups.latest_backup().await {
            Ok(latest) => latest,
            Err(e) => {
                warn!("Could not scan backup directory: {e}");
                None
            }
        };

        let Some(backup) = latest else {
            info!("No backup found, initialising fresh store");
            self.fresh_init().await?;
            return Ok(StartupOutcome::Fresh);
        };

        info!("Found backup {}, restoring", backup.display());
        self.set_phase(LifecyclePhase::Restoring);
        match self.restore_locked(&backup).await {
            Ok(()) => {
                self.set_phase(LifecyclePhase::Ready);
                Ok(StartupOutcome::Restored(backup))
            }
            Err(e) => {
                error!(
                    "Startup restore from {} failed: {e}. Falling back to a fresh store",
                    backup.display()
                );
                self.fresh_init().await?;
                Ok(StartupOutcome::FallbackFresh {
                    backup,
                    error: e.to_string(),
                })
            }
        }
    }

    async fn fresh_init(&self) -> Result<(), BackupError> {
        self.set_phase(LifecyclePhase::FreshInit);
        if let Err(e) = self.store.bootstrap().await {
            self.set_phase(LifecyclePhase::Failed);
            return Err(e.into());
        }
        self.set_phase(LifecyclePhase::Ready);
        Ok(())
    }

    /// Close the pool, run the restore, bootstrap again. Leaves no pool on
    /// failure.
    async fn restore_locked(&self, source: &Path) -> Result<(), BackupError> {
        self.store.shutdown().await?;
        self.backups.restore_from(source).await?;
        self.store.bootstrap().await?;
        Ok(())
    }

    /// Restore `name`, or the latest backup when `None`. Missing files leave
    /// the pool untouched.
    pub async fn restore(&self, name: Option<&str>) -> Result<PathBuf, BackupError> {
        let _guard = self.transition.lock().await;

        let phase = self.phase();
        if !matches!(phase, LifecyclePhase::Ready | LifecyclePhase::Failed) {
            return Err(BackupError::NotReady(format!("cannot restore while {phase:?}")));
        }

        let source = match name {
            Some(name) => self.backups.resolve(name).await?,
            None => self
                .backups
                .latest_backup()
                .await?
                .ok_or(BackupError::NoBackups)?,
        };

        self.set_phase(LifecyclePhase::Restoring);
        match self.restore_locked(&source).await {
            Ok(()) => {
                self.set_phase(LifecyclePhase::Ready);
                Ok(source)
            }
            Err(e) => {
                error!("Restore from {} failed: {e}", source.display());
                // Drop any pool a failed bootstrap may have left half-open.
                if let Err(close_err) = self.store.shutdown().await {
                    warn!("Closing pool after failed restore: {close_err}");
                }
                self.set_phase(LifecyclePhase::Failed);
                Err(e)
            }
        }
    }

    /// Dump the database. Only permitted while `Ready`; the pool is not
    /// touched.
    pub async fn backup(&self, name: Option<String>) -> Result<PathBuf, BackupError> {
        let _guard = self.transition.lock().await;
        let phase = self.phase();
        if phase != LifecyclePhase::Ready {
            return Err(BackupError::NotReady(format!("cannot back up while {phase:?}")));
        }
        self.backups.create(name).await
    }

    /// Release the pool at process exit.
    pub async fn shutdown(&self) -> Result<(), BackupError> {
        let _guard = self.transition.lock().await;
        self.store.shutdown().await?;
        self.set_phase(LifecyclePhase::Cold);
        Ok(())
    }
}
