//! HTTP surface: request/response endpoints plus the WebSocket upgrade.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use causerie_realtime::{
    CallSessionManager, ConnectionRegistry, ConversationSync, Delivery, MessageDispatcher,
};
use causerie_shared::protocol::MessageKind;
use causerie_shared::{Conversation, StoredMessage, UserId};
use causerie_store::NewMessage;

use crate::auth::AuthedUser;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub calls: Arc<CallSessionManager>,
    pub dispatcher: Arc<MessageDispatcher>,
    pub sync: Arc<ConversationSync>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(gateway::ws_handler))
        .route("/api/messages", post(create_message))
        .route("/api/messages/{peer}", get(fetch_history))
        .route("/api/conversations", get(list_conversations))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateMessageRequest {
    recipient: UserId,
    content: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: MessageKind,
    #[serde(default = "default_encrypted")]
    encrypted: bool,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

fn default_encrypted() -> bool {
    true
}

/// Persist a message and trigger live delivery. The sender is the
/// authenticated identity; a failed durable write aborts the whole
/// operation with a retryable status and nothing is delivered.
async fn create_message(
    State(state): State<AppState>,
    AuthedUser(sender): AuthedUser,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<StoredMessage>), ServerError> {
    if req.content.is_empty() {
        return Err(ServerError::BadRequest("content must not be empty".into()));
    }

    let (stored, delivery) = state
        .dispatcher
        .send(NewMessage {
            sender_id: sender,
            recipient_id: req.recipient,
            content: req.content,
            kind: req.kind,
            encrypted: req.encrypted,
        })
        .await?;

    info!(
        message = %stored.id,
        recipient = %stored.recipient_id.short(),
        live = matches!(delivery, Delivery::Online),
        "message created"
    );

    Ok((StatusCode::CREATED, Json(stored)))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    messages: Vec<StoredMessage>,
    has_more: bool,
}

async fn fetch_history(
    State(state): State<AppState>,
    AuthedUser(requester): AuthedUser,
    Path(peer): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let peer = UserId::new(peer);
    let page = params.page.unwrap_or(0);
    let limit = params.limit.unwrap_or_else(|| state.sync.default_page_size());

    let history = state.sync.history(&requester, &peer, page, limit).await?;

    Ok(Json(HistoryResponse {
        messages: history.messages,
        has_more: history.has_more,
    }))
}

async fn list_conversations(
    State(state): State<AppState>,
    AuthedUser(identity): AuthedUser,
) -> Result<Json<Vec<Conversation>>, ServerError> {
    let conversations = state.sync.conversations_for(&identity).await?;
    Ok(Json(conversations))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
