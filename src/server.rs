//! HTTP front-end.
//!
//! Exposes the three inbound entry points of [`ChatSession`] as a small JSON
//! API. Answers are streamed as server-sent events so a browser client can
//! replace the last chat bubble with each snapshot.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/upload` | Extract and store server-local files: `{ "paths": [...] }` |
//! | `POST` | `/ask` | Answer the transcript `{ "history": [...] }` as SSE |
//! | `POST` | `/reset` | Drop all uploads and conversations |
//!
//! # Streaming
//!
//! `/ask` emits `answer` events whose data is the complete answer so far,
//! an `error` event if the model call fails, and a final `done` event.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "paths must not be empty" } }
//! ```

use std::convert::Infallible;
use std::path::PathBuf;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::chat::ChatSession;
use crate::config::Config;
use crate::models::ChatMessage;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    session: ChatSession,
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config, session: ChatSession) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(session);

    println!(
        "repochat listening on http://{} (model: {})",
        bind_addr,
        config.model.model
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the router; exposed so tests can serve it on an ephemeral port.
pub fn router(session: ChatSession) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/ask", post(handle_ask))
        .route("/reset", post(handle_reset))
        .layer(cors)
        .with_state(AppState { session })
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

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.session.provider().model().to_string(),
    })
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadRequest {
    paths: Vec<PathBuf>,
}

#[derive(Serialize)]
struct UploadResponse {
    summary: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    if req.paths.is_empty() {
        return Err(bad_request("paths must not be empty"));
    }
    let summary = state.session.upload_batch(&req.paths).await;
    Ok(Json(UploadResponse { summary }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    #[serde(default)]
    history: Vec<ChatMessage>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let answers = state.session.ask(&req.history);

    let events = answers
        .map(|item| match item {
            Ok(snapshot) => Event::default().event("answer").data(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "answer stream failed");
                Event::default().event("error").data(format!("{:#}", e))
            }
        })
        .chain(futures::stream::once(async {
            Event::default().event("done").data("")
        }))
        .map(Ok::<_, Infallible>);

    Sse::new(events).keep_alive(KeepAlive::default())
}

// ============ POST /reset ============

#[derive(Serialize)]
struct ResetResponse {
    message: String,
}

async fn handle_reset(State(state): State<AppState>) -> Json<ResetResponse> {
    Json(ResetResponse {
        message: state.session.reset().await,
    })
}
