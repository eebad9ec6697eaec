//! HTTP transport for chat turns.
//!
//! `POST /chat` takes `{"messages": [..], "session_id": ".."}`, spawns one
//! orchestration task for the turn and streams its frames back as the
//! response body (`text/plain`, one frame per line). Dropping the response
//! closes the frame channel, which the task observes as cancellation.
//!
//! `GET /health` returns 200 OK with body `ok`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::frame::writer::FrameWriter;
use crate::model::ChatMessage;
use crate::orchestrator::{Orchestrator, TurnContext};
use crate::{AppError, GlobalConfig, Result};

/// Response header carrying the turn's session id.
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

/// Shared state behind every request.
#[derive(Debug)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Turn driver shared by all requests.
    pub orchestrator: Orchestrator,
    /// Parent token for every turn; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far, ending with the user's message.
    pub messages: Vec<ChatMessage>,
    /// Caller-chosen id for log correlation.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

async fn chat(State(state): State<Arc<AppState>>, Json(request): Json<ChatRequest>) -> Response {
    if request.messages.is_empty() {
        return (StatusCode::BAD_REQUEST, "messages must not be empty").into_response();
    }

    let session_id = request
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (writer, frames) = FrameWriter::channel(
        state.config.stream.chunk_size,
        state.config.stream.channel_capacity,
    );
    let writer = writer.with_max_line_bytes(state.config.stream.max_line_bytes);
    let mut ctx = TurnContext::new(
        session_id.clone(),
        &state.config.orchestrator.system_prompt,
        request.messages,
    );
    let orchestrator = state.orchestrator.clone();
    let cancel = state.shutdown.child_token();

    info!(%session_id, "chat turn started");
    tokio::spawn(
        async move {
            orchestrator.run_turn(&mut ctx, &writer, &cancel).await;
        }
        .instrument(info_span!("turn", %session_id)),
    );

    let mut response = (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(frame_stream(frames)),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn frame_stream(
    frames: mpsc::Receiver<Bytes>,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    futures_util::stream::unfold(frames, |mut frames| async move {
        frames.recv().await.map(|line| (Ok(line), frames))
    })
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .with_state(state)
}

/// Start the HTTP transport on `config.http_port`.
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails to bind.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], state.config.http_port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;
    serve_with_listener(listener, state, ct).await
}

/// Serve on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server stops with an I/O error.
pub async fn serve_with_listener(
    listener: TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "starting HTTP chat transport");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
            shutdown.cancel();
        })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("HTTP chat transport shut down");
    Ok(())
}
