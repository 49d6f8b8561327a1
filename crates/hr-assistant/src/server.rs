//! HTTP JSON API.
//!
//! # Endpoints
//!
//! | Method   | Path             | Description |
//! |----------|------------------|-------------|
//! | `POST`   | `/chat`          | Ask a question within a session |
//! | `POST`   | `/search`        | Retrieval only, no generation |
//! | `POST`   | `/ingest`        | Rescan `[documents] root` and ingest |
//! | `GET`    | `/sessions/{id}` | Turns of a session |
//! | `DELETE` | `/sessions/{id}` | End a session |
//! | `GET`    | `/stats`         | Knowledge-base info |
//! | `GET`    | `/health`        | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `index_mismatch` (500),
//! `unavailable` (503), `internal` (500).
//!
//! A chat turn that hits an exhausted external service is not an HTTP error:
//! it answers with status `unavailable` in the body.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use hr_assistant_core::models::Turn;
use hr_assistant_core::Error;

use crate::assistant::{Assistant, QueryResponse};
use crate::config::Config;
use crate::connector_fs::scan_documents;
use crate::ingest::{ingest_sources, IngestReport};
use crate::stats::KnowledgeBaseInfo;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    assistant: Arc<Assistant>,
}

/// Build the router. Split out from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(config: Arc<Config>, assistant: Arc<Assistant>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/search", post(handle_search))
        .route("/ingest", post(handle_ingest))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_end_session),
        )
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { config, assistant })
}

/// Start the server on `[server] bind`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let assistant = Arc::new(Assistant::from_config(config).await?);
    let bind_addr = config.server.bind.clone();
    let app = router(Arc::new(config.clone()), assistant);

    println!("HR assistant listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        if err.is_index_mismatch() {
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "index_mismatch",
                message,
            }
        } else if err.is_external() {
            AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "unavailable",
                message,
            }
        } else {
            match err {
                Error::Config(_) | Error::Ingestion { .. } => bad_request(message),
                _ => internal(message),
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(domain) => domain.into(),
            Err(other) => internal(format!("{:#}", other)),
        }
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

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    /// Omitted on the first message; a new session id is returned.
    session_id: Option<String>,
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let session_id = match req.session_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => uuid::Uuid::new_v4().to_string(),
    };
    let response = state.assistant.ask(&session_id, &req.message).await?;
    Ok(Json(response))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchHit {
    chunk_id: String,
    document_id: String,
    document_name: String,
    start: usize,
    end: usize,
    score: f32,
    text: String,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let results = state
        .assistant
        .search(&req.query, req.k)
        .await?
        .into_iter()
        .map(|r| SearchHit {
            chunk_id: r.citation.chunk_id,
            document_id: r.citation.document_id,
            document_name: r.citation.document_name,
            start: r.citation.start,
            end: r.citation.end,
            score: r.score,
            text: r.chunk.text,
        })
        .collect();
    Ok(Json(SearchResponse { results }))
}

// ============ POST /ingest ============

#[derive(Deserialize, Default)]
struct IngestRequest {
    #[serde(default)]
    force: bool,
}

async fn handle_ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestReport>, AppError> {
    let req: IngestRequest = if body.is_empty() {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };
    if state.config.documents.root.is_none() {
        return Err(bad_request("documents.root is not configured"));
    }
    let documents = state.config.documents.clone();
    let sources = tokio::task::spawn_blocking(move || scan_documents(&documents))
        .await
        .map_err(|e| internal(e.to_string()))??;
    let report = ingest_sources(&state.assistant.ingest_context(req.force), sources).await;
    Ok(Json(report))
}

// ============ /sessions/{id} ============

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    turns: Vec<Turn>,
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let turns = state
        .assistant
        .sessions()
        .turns(&id)
        .await
        .ok_or_else(|| not_found(format!("session not found: {}", id)))?;
    Ok(Json(SessionResponse {
        session_id: id,
        turns,
    }))
}

async fn handle_end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.assistant.sessions().end(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("session not found: {}", id)))
    }
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<KnowledgeBaseInfo>, AppError> {
    let info = KnowledgeBaseInfo::gather(&state.config, state.assistant.index().as_ref()).await?;
    Ok(Json(info))
}
