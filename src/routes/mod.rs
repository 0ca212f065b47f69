pub mod database;
pub mod images;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::error;

use crate::app::AppState;
use crate::backup::BackupError;
use crate::lifecycle::LifecyclePhase;
use crate::models::api::HealthResponse;
use crate::vector_store::StoreError;

pub type ApiError = (StatusCode, String);

/// Build all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .merge(images::routes())
        .merge(database::routes())
        .with_state(state)
}

/// GET / - Service health and lifecycle phase.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let phase = state.lifecycle.phase();
    let records = if phase == LifecyclePhase::Ready {
        state.store.count().await.ok()
    } else {
        None
    };
    Json(HealthResponse {
        status: if phase == LifecyclePhase::Ready { "ok" } else { "degraded" }.to_string(),
        environment: state.settings.environment.clone(),
        phase,
        pool: state.store.pool_phase(),
        records,
    })
}

pub(crate) fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::Unavailable(msg) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Storage unavailable: {msg}"),
        ),
        StoreError::DimensionMismatch { .. } => (StatusCode::BAD_REQUEST, e.to_string()),
        StoreError::Database(_) => {
            error!("Vector store error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {e}"))
        }
    }
}

pub(crate) fn backup_error(e: BackupError) -> ApiError {
    match e {
        BackupError::NotFound(_) | BackupError::NoBackups => (StatusCode::NOT_FOUND, e.to_string()),
        BackupError::InvalidName(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        BackupError::NotReady(_) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        BackupError::Store(e) => store_error(e),
        BackupError::BackupFailed(_) | BackupError::RestoreFailed(_) | BackupError::Io(_) => {
            error!("Database lifecycle error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::test_app;
    use crate::vector_store::pool::PoolPhase;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_health_reports_ready() {
        let app = test_app().await;
        let Json(resp) = health(State(app.state.clone())).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.environment, "test");
        assert_eq!(resp.phase, LifecyclePhase::Ready);
        assert_eq!(resp.pool, PoolPhase::Active);
        assert_eq!(resp.records, Some(0));
    }

    #[tokio::test]
    async fn test_health_after_shutdown_is_degraded() {
        let app = test_app().await;
        app.state.lifecycle.shutdown().await.unwrap();
        let Json(resp) = health(State(app.state.clone())).await;
        assert_eq!(resp.status, "degraded");
        assert_eq!(resp.pool, PoolPhase::Absent);
        assert!(resp.records.is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            store_error(StoreError::Unavailable("down".into())).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            store_error(StoreError::DimensionMismatch { expected: 3, actual: 2 }).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            backup_error(BackupError::NotFound(PathBuf::from("x.dump"))).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(backup_error(BackupError::NoBackups).0, StatusCode::NOT_FOUND);
        assert_eq!(
            backup_error(BackupError::InvalidName("../x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            backup_error(BackupError::RestoreFailed("exit 1".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            backup_error(BackupError::Store(StoreError::Unavailable("closed".into()))).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
