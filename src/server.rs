//! JSON HTTP API over the question-answering pipeline.
//!
//! Each client works in its own session, created with `POST /sessions`.
//! A session holds the attached index and the conversation history; calls
//! on one session are serialized by a per-session lock, while ingestion
//! releases that lock during extraction and embedding so concurrent
//! questions are refused with `rebuild_in_progress` instead of queuing.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions` | Create a session |
//! | `POST`   | `/sessions/{id}/documents` | Upload documents and rebuild the index |
//! | `POST`   | `/sessions/{id}/load` | Attach the persisted index |
//! | `POST`   | `/sessions/{id}/ask` | Ask a question |
//! | `GET`    | `/sessions/{id}/history` | Conversation so far |
//! | `GET`    | `/sessions/{id}/export` | Transcript as `text/plain` |
//! | `POST`   | `/sessions/{id}/summarize` | Summarize the attached index |
//! | `DELETE` | `/sessions/{id}` | Drop a session |
//! | `POST`   | `/feedback` | Record thumbs-up / thumbs-down |
//! | `POST`   | `/speech` | Synthesize speech (`audio/mpeg`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "no documents have been processed yet; ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `not_ready` (409),
//! `rebuild_in_progress` (409), `conflict` (409), `credential_missing` (503),
//! `service_unavailable` (502), `internal` (500).

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::conversation::Session;
use crate::error::PipelineError;
use crate::models::{Answer, ConversationTurn, Document, FeedbackRecord, Sentiment};
use crate::pipeline::{IngestReport, Pipeline};
use crate::speech::AUDIO_MIME;

type SessionMap = HashMap<String, Arc<Mutex<Session>>>;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    sessions: Arc<RwLock<SessionMap>>,
}

/// Starts the HTTP server on `[server].bind` with the configured providers.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config.clone())?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("docqa server listening on http://{}", bind_addr);

    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

/// Build the router around an existing pipeline.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let state = AppState {
        pipeline,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}", axum::routing::delete(handle_delete_session))
        .route("/sessions/{id}/documents", post(handle_upload))
        .route("/sessions/{id}/load", post(handle_load))
        .route("/sessions/{id}/ask", post(handle_ask))
        .route("/sessions/{id}/history", get(handle_history))
        .route("/sessions/{id}/export", get(handle_export))
        .route("/sessions/{id}/summarize", post(handle_summarize))
        .route("/feedback", post(handle_feedback))
        .route("/speech", post(handle_speech))
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

/// Internal error type that converts into an Axum HTTP response.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let code = err.code();
        let status = match code {
            "bad_request" => StatusCode::BAD_REQUEST,
            "not_ready" | "rebuild_in_progress" | "conflict" => StatusCode::CONFLICT,
            "credential_missing" => StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

async fn find_session(state: &AppState, id: &str) -> Result<Arc<Mutex<Session>>, AppError> {
    state
        .sessions
        .read()
        .await
        .get(id)
        .cloned()
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))
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

// ============ Sessions ============

#[derive(Serialize)]
struct SessionResponse {
    id: String,
    state: &'static str,
}

async fn handle_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionResponse>) {
    let id = uuid::Uuid::new_v4().to_string();
    state
        .sessions
        .write()
        .await
        .insert(id.clone(), Arc::new(Mutex::new(Session::new(id.clone()))));
    tracing::debug!(session = %id, "created session");
    (
        StatusCode::CREATED,
        Json(SessionResponse { id, state: "idle" }),
    )
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .sessions
        .write()
        .await
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))
}

// ============ POST /sessions/{id}/documents ============

#[derive(Deserialize)]
struct UploadRequest {
    documents: Vec<UploadedDocument>,
}

#[derive(Deserialize)]
struct UploadedDocument {
    name: String,
    content_type: String,
    data_base64: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let session = find_session(&state, &id).await?;

    let mut docs = Vec::with_capacity(req.documents.len());
    for d in req.documents {
        let bytes = BASE64
            .decode(d.data_base64.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", d.name, e)))?;
        docs.push(Document::new(d.name, d.content_type, bytes));
    }

    let report = state.pipeline.ingest_shared(&session, &docs).await?;
    Ok(Json(report))
}

// ============ POST /sessions/{id}/load ============

#[derive(Serialize)]
struct LoadResponse {
    loaded: bool,
    state: &'static str,
}

async fn handle_load(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LoadResponse>, AppError> {
    let session = find_session(&state, &id).await?;
    let mut session = session.lock().await;
    let loaded = state.pipeline.load(&mut session).await?;
    Ok(Json(LoadResponse {
        loaded,
        state: session.state().name(),
    }))
}

// ============ POST /sessions/{id}/ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    let session = find_session(&state, &id).await?;
    let mut session = session.lock().await;
    let answer = state.pipeline.ask(&mut session, &req.question).await?;
    Ok(Json(answer))
}

// ============ GET /sessions/{id}/history ============

#[derive(Serialize)]
struct HistoryResponse {
    state: &'static str,
    turns: Vec<ConversationTurn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = find_session(&state, &id).await?;
    let session = session.lock().await;
    Ok(Json(HistoryResponse {
        state: session.state().name(),
        turns: session.history().to_vec(),
    }))
}

// ============ GET /sessions/{id}/export ============

async fn handle_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let session = find_session(&state, &id).await?;
    let transcript = state.pipeline.transcript(&*session.lock().await);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"chat_history.txt\"",
            ),
        ],
        transcript,
    )
        .into_response())
}

// ============ POST /sessions/{id}/summarize ============

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

async fn handle_summarize(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    let session = find_session(&state, &id).await?;
    let session = session.lock().await;
    let summary = state.pipeline.summarize_session(&session).await?;
    Ok(Json(SummaryResponse { summary }))
}

// ============ POST /feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    sentiment: String,
    answer: String,
}

async fn handle_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackRecord>), AppError> {
    let sentiment: Sentiment = req.sentiment.parse().map_err(bad_request)?;
    let record = state.pipeline.record_feedback(sentiment, &req.answer)?;
    Ok((StatusCode::CREATED, Json(record)))
}

// ============ POST /speech ============

#[derive(Deserialize)]
struct SpeechRequest {
    text: String,
}

async fn handle_speech(
    State(state): State<AppState>,
    Json(req): Json<SpeechRequest>,
) -> Result<Response, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let audio = state.pipeline.speak(&req.text).await?;
    Ok(([(header::CONTENT_TYPE, AUDIO_MIME)], audio).into_response())
}
