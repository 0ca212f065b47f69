use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use super::{ApiError, store_error};
use crate::app::AppState;
use crate::ingest::IngestError;
use crate::models::api::{
    EmbeddingSearchRequest, ListImagesResponse, ListParams, ProcessFolderRequest,
    ProcessFolderResponse, SearchResponse, default_top_k,
};
use crate::models::image::SimilarImage;

const MAX_TOP_K: usize = 100;
const MAX_LIST_LIMIT: i64 = 1000;
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Image ingestion and search routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images", get(list_images))
        .route("/images/process-folder", post(process_folder))
        .route("/images/search-by-embedding", post(search_by_embedding))
        .route(
            "/images/search-by-upload",
            post(search_by_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}

/// Resolve a client-supplied folder under `upload_root`. Absolute paths and
/// parent components are rejected.
fn resolve_folder(upload_root: &Path, folder: &str) -> Result<PathBuf, ApiError> {
    let relative = Path::new(folder);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Folder '{folder}' must be relative to the upload directory"),
        ));
    }
    Ok(upload_root.join(relative))
}

fn validate_top_k(top_k: usize) -> Result<usize, ApiError> {
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("top_k must be between 1 and {MAX_TOP_K}"),
        ));
    }
    Ok(top_k)
}

fn validate_query_vector(embedding: &[f32]) -> Result<(), ApiError> {
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err((
            StatusCode::BAD_REQUEST,
            "embedding must contain only finite values".to_string(),
        ));
    }
    Ok(())
}

fn validate_list_params(params: &ListParams) -> Result<(), ApiError> {
    if params.limit < 1 || params.limit > MAX_LIST_LIMIT {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {MAX_LIST_LIMIT}"),
        ));
    }
    if params.offset < 0 {
        return Err((StatusCode::BAD_REQUEST, "offset must be non-negative".to_string()));
    }
    Ok(())
}

fn non_empty(results: Vec<SimilarImage>) -> Result<Vec<SimilarImage>, ApiError> {
    if results.is_empty() {
        return Err((StatusCode::NOT_FOUND, "No similar images found.".to_string()));
    }
    Ok(results)
}

/// POST /images/process-folder - Embed every image in a folder, in the background.
async fn process_folder(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessFolderRequest>,
) -> Result<(StatusCode, Json<ProcessFolderResponse>), ApiError> {
    let target = resolve_folder(state.pipeline.upload_root(), &req.folder)?;
    if !target.is_dir() {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Folder '{}' not found in upload directory.", req.folder),
        ));
    }

    let job_id = uuid::Uuid::new_v4().to_string();
    let pipeline = state.pipeline.clone();
    let cancel = state.shutdown.child_token();
    let job = job_id.clone();
    state.jobs.spawn(async move {
        match pipeline.process_folder(&target, &cancel).await {
            Ok(report) => info!(
                "Job {job} finished: succeeded={}, skipped={}, inserted={}",
                report.succeeded, report.skipped, report.inserted
            ),
            Err(IngestError::Cancelled(report)) => info!(
                "Job {job} cancelled after {} images",
                report.succeeded + report.skipped
            ),
            Err(e) => error!("Job {job} failed: {e}"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessFolderResponse {
            message: format!(
                "Processing started for folder: {}. This may take some time.",
                req.folder
            ),
            job_id,
        }),
    ))
}

/// POST /images/search-by-embedding - Similarity search with a precomputed vector.
async fn search_by_embedding(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmbeddingSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let top_k = validate_top_k(req.top_k)?;
    validate_query_vector(&req.embedding)?;
    let results = state
        .store
        .search(&req.embedding, top_k)
        .await
        .map_err(store_error)?;

    Ok(Json(SearchResponse {
        query_filename: None,
        similar_images: non_empty(results)?,
    }))
}

/// POST /images/search-by-upload - Embed an uploaded image and search with it.
async fn search_by_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut top_k = default_top_k();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart field: {e}"),
        )
    })? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {e}")))?
                        .to_vec(),
                );
            }
            "top_k" => {
                let text = field.text().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read top_k: {e}"))
                })?;
                top_k = text
                    .trim()
                    .parse()
                    .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid top_k: {text}")))?;
            }
            _ => {}
        }
    }

    let top_k = validate_top_k(top_k)?;
    let data = file_bytes.ok_or_else(|| (StatusCode::BAD_REQUEST, "No file provided".to_string()))?;
    let results = search_with_image(&state, data, top_k).await?;

    Ok(Json(SearchResponse {
        query_filename: filename,
        similar_images: non_empty(results)?,
    }))
}

async fn search_with_image(
    state: &AppState,
    data: Vec<u8>,
    top_k: usize,
) -> Result<Vec<SimilarImage>, ApiError> {
    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&data))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Decode task failed: {e}")))?
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid image: {e}")))?;

    let embedding = state.pipeline.embed_with_retry(&image).await.map_err(|e| {
        error!("Embedding error: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Embedding error: {e}"),
        )
    })?;

    state.store.search(&embedding, top_k).await.map_err(store_error)
}

/// GET /images - Page through stored images by id.
async fn list_images(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListImagesResponse>, ApiError> {
    validate_list_params(&params)?;
    let images = state
        .store
        .list(params.limit, params.offset)
        .await
        .map_err(store_error)?;
    Ok(Json(ListImagesResponse { images }))
}
