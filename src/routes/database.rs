use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use std::path::Path;
use std::sync::Arc;

use super::{ApiError, backup_error};
use crate::app::AppState;
use crate::models::api::{BackupParams, BackupResponse, RestoreResponse};

/// Backup and restore routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/database/backup", post(backup_database))
        .route("/database/restore", post(restore_database))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// POST /database/backup - Dump the database into the backup directory.
async fn backup_database(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BackupParams>,
) -> Result<Json<BackupResponse>, ApiError> {
    let path = state
        .lifecycle
        .backup(params.filename)
        .await
        .map_err(backup_error)?;
    Ok(Json(BackupResponse {
        message: "Backup completed successfully.".to_string(),
        backup_file: file_name(&path),
    }))
}

/// POST /database/restore - Replace the database with a backup (latest if unnamed).
async fn restore_database(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BackupParams>,
) -> Result<Json<RestoreResponse>, ApiError> {
    let path = state
        .lifecycle
        .restore(params.filename.as_deref())
        .await
        .map_err(backup_error)?;
    Ok(Json(RestoreResponse {
        message: "Restore completed successfully.".to_string(),
        restored_from: file_name(&path),
    }))
}
