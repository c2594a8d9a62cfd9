//! HTTP gateway for Parley.
//!
//! A thin seam onto the mailbox boundary:
//!
//! | route | effect |
//! |---|---|
//! | `GET /health` | liveness |
//! | `POST /v1/messages` | queue a user message |
//! | `GET /v1/replies/{user_id}` | take the latest agent reply, or "please wait" |
//! | `POST /v1/chat/{user_id}` | run one task on whatever the user queued |
//!
//! Built on Axum.

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use parley_agent::{AgentResponse, TaskRunner};
use parley_config::GatewayConfig;
use parley_core::error::MailboxError;
use parley_mailbox::{AgentReply, ChatMessage};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runner: Arc<TaskRunner>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/messages", post(put_message_handler))
        .route("/v1/replies/{user_id}", get(get_reply_handler))
        .route("/v1/chat/{user_id}", post(chat_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: &GatewayConfig, runner: Arc<TaskRunner>) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(GatewayState { runner }));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

// --- Errors ---

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(MailboxError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MailboxError::UnregisteredUser(_) | MailboxError::NotGroupMember { .. } => {
                StatusCode::FORBIDDEN
            }
            MailboxError::AlreadyChatting(_) => StatusCode::CONFLICT,
        };
        warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<MailboxError> for ApiError {
    fn from(e: MailboxError) -> Self {
        Self(e)
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn put_message_handler(
    State(state): State<SharedState>,
    Json(message): Json<ChatMessage>,
) -> Result<StatusCode, ApiError> {
    info!(
        user_id = %message.user_id,
        message_len = message.text.len(),
        files = message.file_paths.len(),
        "User message received"
    );
    state.runner.mailbox().put_user_message(message)?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_reply_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Json<AgentReply> {
    Json(state.runner.mailbox().get_agent_reply(&user_id))
}

/// Runs the task to completion. Inner replies (questions, confirmations)
/// are read meanwhile through `/v1/replies`.
async fn chat_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.runner.achat(&user_id).await? {
        Some(response) => Ok(Json::<AgentResponse>(response).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
