//! Dataset HTTP API.
//!
//! Lets operators add and remove source documents without shell access to
//! the host. Every upload triggers an incremental build in-process; the
//! running bot notices the new index through its freshness signature.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Liveness check (returns version) |
//! | `GET`    | `/datasets` | Files in the data directory with their build state |
//! | `POST`   | `/datasets/upload` | Multipart `file` upload (`.pdf` / `.txt`), then build |
//! | `DELETE` | `/datasets/{filename}` | Remove a document from disk, index and manifest |
//!
//! Everything except `/health` requires `Authorization: Bearer <token>`,
//! with the token read from the environment variable named by
//! `[api].token_env`.
//!
//! # Error Contract
//!
//! ```json
//! { "ok": false, "error": { "code": "busy", "message": "build is busy ...; try again" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `conflict` (409), `payload_too_large` (413), `busy` (429),
//! `build_failed` (500), `internal` (500).
//!
//! Builds and deletes serialise on the same file lock as the CLI. A caller
//! that cannot get it within `[api].build_lock_timeout_secs` gets `429`.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{require_env, Config};
use crate::embedding::{self, EmbeddingProvider};
use crate::format::compile_regex;
use crate::ingest::{self, BuildReport, DeleteReport};
use crate::lockfile::{BuildLock, LockError};
use crate::manifest::ProcessedFiles;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| compile_regex(r"[^a-zA-Z0-9._-]+"));

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    embedder: Arc<dyn EmbeddingProvider>,
    api_token: Arc<str>,
}

impl AppState {
    pub fn new(config: Config, embedder: Arc<dyn EmbeddingProvider>, api_token: String) -> Self {
        Self {
            config: Arc::new(config),
            embedder,
            api_token: api_token.into(),
        }
    }
}

/// Starts the dataset API on `[api].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let token = require_env(&config.api.token_env)?;
    let embedder = embedding::create_provider(&config.embedding)?;
    std::fs::create_dir_all(&config.paths.data_dir)?;

    let listener = tokio::net::TcpListener::bind(&config.api.bind).await?;
    tracing::info!(bind = %config.api.bind, "dataset API listening");
    serve(listener, AppState::new(config.clone(), embedder, token)).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/datasets", get(handle_list))
        .route("/datasets/upload", post(handle_upload))
        .route("/datasets/{filename}", delete(handle_delete))
        .layer(DefaultBodyLimit::max(state.config.api.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: ErrorDetail,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
            extra: self.extra,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(err: impl std::fmt::Display) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Busy { .. } => {
                AppError::new(StatusCode::TOO_MANY_REQUESTS, "busy", err.to_string())
            }
            LockError::Io { .. } => internal(err),
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match provided {
        Some(token) if token == &*state.api_token => Ok(()),
        _ => Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
        )),
    }
}

/// Reduce an uploaded name to a safe basename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned = UNSAFE_CHARS.replace_all(base, "_").to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return "uploaded.bin".to_string();
    }
    if cleaned.starts_with('.') {
        return format!("_{cleaned}");
    }
    cleaned
}

fn has_allowed_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".pdf") || lower.ends_with(".txt")
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /datasets ============

#[derive(Serialize)]
struct DatasetEntry {
    filename: String,
    size_bytes: u64,
    processed: bool,
}

#[derive(Serialize)]
struct DatasetList {
    ok: bool,
    datasets: Vec<DatasetEntry>,
}

async fn handle_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DatasetList>, AppError> {
    authorize(&state, &headers)?;
    let manifest = ProcessedFiles::load(&state.config.paths.processed_file);
    let datasets = ingest::list_data_files(&state.config)
        .map_err(internal)?
        .into_iter()
        .map(|filename| {
            let size_bytes = std::fs::metadata(state.config.paths.data_dir.join(&filename))
                .map(|m| m.len())
                .unwrap_or(0);
            DatasetEntry {
                processed: manifest.contains(&filename),
                filename,
                size_bytes,
            }
        })
        .collect();
    Ok(Json(DatasetList { ok: true, datasets }))
}

// ============ POST /datasets/upload ============

#[derive(Serialize)]
struct UploadResponse {
    ok: bool,
    message: &'static str,
    saved_as: String,
    build: BuildReport,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    authorize(&state, &headers)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("uploaded.bin").to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((original, bytes));
        break;
    }
    let (original, bytes) = upload.ok_or_else(|| bad_request("file is required"))?;

    let filename = sanitize_filename(&original);
    if !has_allowed_extension(&filename) {
        return Err(bad_request("Only .pdf or .txt allowed"));
    }

    let config = &state.config;
    let _lock = BuildLock::acquire(&config.paths.lock_file, config.api.build_lock_timeout()).await?;

    let path = config.paths.data_dir.join(&filename);
    let manifest = ProcessedFiles::load(&config.paths.processed_file);
    let exists = path.exists();
    let already_built = manifest.contains(&filename);
    if exists || already_built {
        return Err(
            AppError::new(StatusCode::CONFLICT, "conflict", "file sudah ada")
                .with("filename", filename)
                .with("exists_in_data_dir", exists)
                .with("already_built", already_built),
        );
    }

    tokio::fs::create_dir_all(&config.paths.data_dir)
        .await
        .map_err(internal)?;
    tokio::fs::write(&path, &bytes).await.map_err(internal)?;
    tracing::info!(file = %filename, bytes = bytes.len(), "upload saved");

    let report = ingest::run_build(config, state.embedder.as_ref())
        .await
        .map_err(|e| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "build_failed",
                format!("{:#}", e),
            )
            .with("file_saved", filename.clone())
        })?;

    if let Some((_, reason)) = report.skipped.iter().find(|(name, _)| *name == filename) {
        return Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "build_failed",
            format!("{filename} was not indexed: {reason}"),
        )
        .with("file_saved", filename.clone()));
    }

    Ok(Json(UploadResponse {
        ok: true,
        message: "uploaded & build executed",
        saved_as: filename,
        build: report,
    }))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError::new(status, code, err.body_text())
}

// ============ DELETE /datasets/{filename} ============

#[derive(Serialize)]
struct DeleteResponse {
    ok: bool,
    deleted: DeleteReport,
}

async fn handle_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    authorize(&state, &headers)?;
    if !ingest::is_valid_dataset_name(&filename) {
        return Err(bad_request(format!("invalid file name: {filename}")));
    }

    let config = &state.config;
    let _lock = BuildLock::acquire(&config.paths.lock_file, config.api.build_lock_timeout()).await?;
    match ingest::delete_document(config, &filename).await.map_err(internal)? {
        Some(deleted) => Ok(Json(DeleteResponse { ok: true, deleted })),
        None => Err(AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no dataset named {filename}"),
        )),
    }
}
