//! HTTP question-answering service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Streamed RAG answer to `{ "question": "..." }` |
//! | `POST` | `/search` | Ranked documents for `{ "query", "mode"?, "limit"?, "source"? }` |
//! | `GET`  | `/documents/{id}` | A stored document with its chunks |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/query` answers with `text/plain; charset=utf-8` and `Cache-Control:
//! no-cache`, written token by token. Failures detected before the first
//! token use the JSON error contract; later ones end the body with a
//! `{"error": "..."}` line.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `llm_disabled` (400), `embeddings_disabled` (400),
//! `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends
//! can call the API directly.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::answer;
use crate::config::Config;
use crate::db;
use crate::get::{get_document, DocumentResponse};
use crate::models::SearchResult;
use crate::search::{search_documents, SearchMode};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let app = router(config.clone(), pool);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("RGPD server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(config: Config, pool: SqlitePool) -> Router {
    let state = AppState {
        config: Arc::new(config),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/search", post(handle_search))
        .route("/documents/{id}", get(handle_get_document))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Maps pipeline errors to the error contract: validation and
/// configuration problems are the caller's (400), anything else is ours.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("must not be empty") || msg.contains("Unknown search mode") {
        bad_request(msg)
    } else if msg.contains("LLM provider is disabled") {
        app_error(StatusCode::BAD_REQUEST, "llm_disabled", msg)
    } else if msg.contains("requires embeddings") {
        app_error(StatusCode::BAD_REQUEST, "embeddings_disabled", msg)
    } else {
        error!(error = %msg, "request failed");
        app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Response, AppError> {
    let prepared = answer::prepare_answer(&state.config, &state.pool, &req.question)
        .await
        .map_err(classify_error)?;

    let pieces = answer::stream_answer(prepared.tokens)
        .map(|piece| Ok::<_, Infallible>(Bytes::from(piece)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-message-id", prepared.message_id.as_str())
        .body(Body::from_stream(pieces))
        .map_err(|e| classify_error(e.into()))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
    mode: Option<String>,
    limit: Option<i64>,
    source: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let config = &state.config;
    let mode = match req.mode.as_deref() {
        Some(m) => SearchMode::parse(m),
        None => SearchMode::for_context(config),
    }
    .map_err(classify_error)?;
    let limit = req.limit.unwrap_or(config.retrieval.final_limit).max(1) as usize;

    let results = search_documents(
        &state.pool,
        config,
        &req.query,
        mode,
        req.source.as_deref(),
        limit,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(SearchResponse { results }))
}

// ============ GET /documents/{id} ============

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    match get_document(&state.pool, &id).await {
        Ok(Some(doc)) => Ok(Json(doc)),
        Ok(None) => Err(not_found(format!("document not found: {}", id))),
        Err(e) => Err(classify_error(e)),
    }
}
