//! HTTP API for job submission, library listings, and search.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/jobs/scrape` | Queue a scrape job, returns `{ "jobId": … }` |
//! | `GET`  | `/api/jobs` | List jobs |
//! | `GET`  | `/api/jobs/{id}` | Job status |
//! | `DELETE` | `/api/jobs/{id}` | Cancel a job |
//! | `GET`  | `/api/libraries` | All libraries with version aggregates |
//! | `GET`  | `/api/libraries/{name}` | One library's versions |
//! | `DELETE` | `/api/libraries/{name}/versions/{version}` | Remove a version's chunks |
//! | `GET`  | `/api/search` | Hybrid search with context expansion |
//! | `GET`  | `/health` | Health check |
//!
//! Errors are explicit JSON payloads: `{ "error": { "code", "message" } }`.
//! A failed version resolution includes the indexed versions as
//! suggestions so callers can retry sensibly.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::error::DocdexError;
use crate::manager::{Job, PipelineManager};
use crate::models::{SearchResult, VersionDetails};
use crate::scraper::ScrapeOptions;
use crate::search::{search_library, SearchOptions};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub manager: Arc<PipelineManager>,
}

/// Serve the API on `bind` until the process terminates.
pub async fn run_server(state: AppState, bind: &str) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/jobs/scrape", post(handle_enqueue))
        .route("/api/jobs", get(handle_list_jobs))
        .route("/api/jobs/{id}", get(handle_get_job).delete(handle_cancel_job))
        .route("/api/libraries", get(handle_list_libraries))
        .route("/api/libraries/{name}", get(handle_get_library))
        .route(
            "/api/libraries/{name}/versions/{version}",
            delete(handle_remove_version),
        )
        .route("/api/search", get(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind, "API server listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error mapping ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_versions: Option<Vec<String>>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    available_versions: Option<Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                available_versions: self.available_versions,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DocdexError> for AppError {
    fn from(e: DocdexError) -> Self {
        let (status, code) = match &e {
            DocdexError::InvalidUrl { .. } => (StatusCode::BAD_REQUEST, "invalid_url"),
            DocdexError::InvalidVersion(_) => (StatusCode::BAD_REQUEST, "invalid_version"),
            DocdexError::VersionNotFound { .. } => (StatusCode::NOT_FOUND, "version_not_found"),
            DocdexError::UnknownJob(_) => (StatusCode::NOT_FOUND, "unknown_job"),
            DocdexError::EmptyUrl => (StatusCode::BAD_REQUEST, "empty_url"),
            DocdexError::NoStrategy(_) => (StatusCode::BAD_REQUEST, "unsupported_url"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let available_versions = match &e {
            DocdexError::VersionNotFound { available, .. } => Some(available.clone()),
            _ => None,
        };
        AppError {
            status,
            code: code.to_string(),
            message: e.to_string(),
            available_versions,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        available_versions: None,
    }
}

// ============ Jobs ============

#[derive(Serialize)]
struct EnqueueResponse {
    #[serde(rename = "jobId")]
    job_id: Uuid,
}

async fn handle_enqueue(
    State(state): State<AppState>,
    Json(options): Json<ScrapeOptions>,
) -> Result<Json<EnqueueResponse>, AppError> {
    if options.library.trim().is_empty() {
        return Err(bad_request("library is required"));
    }
    let library = options.library.clone();
    let version = options.version.clone();
    let job_id = state
        .manager
        .enqueue_job(&library, Some(&version), options)
        .await?;
    Ok(Json(EnqueueResponse { job_id }))
}

async fn handle_list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.manager.list_jobs())
}

async fn handle_get_job(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Job>, AppError> {
    state
        .manager
        .get_job(id)
        .map(Json)
        .ok_or_else(|| DocdexError::UnknownJob(id.to_string()).into())
}

async fn handle_cancel_job(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<StatusCode, AppError> {
    state.manager.cancel_job(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Libraries ============

#[derive(Serialize)]
struct LibraryEntry {
    name: String,
    versions: Vec<VersionDetails>,
}

async fn handle_list_libraries(
    State(state): State<AppState>,
) -> Result<Json<Vec<LibraryEntry>>, AppError> {
    let map = state.store.query_library_versions().await?;
    Ok(Json(
        map.into_iter()
            .map(|(name, versions)| LibraryEntry { name, versions })
            .collect(),
    ))
}

async fn handle_get_library(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<LibraryEntry>, AppError> {
    let mut map = state.store.query_library_versions().await?;
    let name = name.to_lowercase();
    match map.remove(&name) {
        Some(versions) => Ok(Json(LibraryEntry { name, versions })),
        None => Err(AppError {
            status: StatusCode::NOT_FOUND,
            code: "unknown_library".to_string(),
            message: format!("library '{name}' has no indexed documents"),
            available_versions: None,
        }),
    }
}

#[derive(Serialize)]
struct RemoveResponse {
    removed: u64,
}

async fn handle_remove_version(
    State(state): State<AppState>,
    AxumPath((name, version)): AxumPath<(String, String)>,
) -> Result<Json<RemoveResponse>, AppError> {
    // "unversioned" addresses the empty-string partition, which cannot
    // appear as a path segment.
    let version = if version == "unversioned" { String::new() } else { version };
    let removed = state.store.delete_documents(&name, &version).await?;
    Ok(Json(RemoveResponse { removed }))
}

// ============ Search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    library: String,
    #[serde(default)]
    version: Option<String>,
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    exact_match: Option<bool>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    if params.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = params.limit.unwrap_or(5);
    if limit == 0 {
        return Err(bad_request("limit must be strictly positive"));
    }
    let options = SearchOptions {
        library: params.library,
        version: params.version,
        query: params.query,
        limit,
        exact_match: params.exact_match.unwrap_or(false),
    };
    let results = search_library(&state.store, &options).await?;
    Ok(Json(results))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
