use axum::{
    extract::{ws::{WebSocket, WebSocketUpgrade}, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::{models::realtime::FeedKind, state::AppState, utils::middleware::AuthUser};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // 通知 feed 推送
        .route("/feed", get(feed_socket_handler))
        // 会话列表推送
        .route("/conversations", get(conversations_socket_handler))
}

/// WebSocket连接处理器
/// GET /api/realtime/feed
async fn feed_socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Response {
    upgrade(ws, state, user, FeedKind::Notifications, "feed")
}

/// GET /api/realtime/conversations
async fn conversations_socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Response {
    upgrade(ws, state, user, FeedKind::Conversations, "conversations")
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    user: AuthUser,
    kind: FeedKind,
    prefix: &str,
) -> Response {
    let session_id = format!("{}_{}", prefix, uuid::Uuid::new_v4());

    info!("Socket upgrade from user: {} with session: {}", user.id, session_id);

    ws.on_upgrade(move |socket| handle_session(socket, state, user, session_id, kind))
}

async fn handle_session(
    socket: WebSocket,
    state: Arc<AppState>,
    user: AuthUser,
    session_id: String,
    kind: FeedKind,
) {
    if let Err(e) = state
        .websocket_service
        .handle_connection(socket, user.id.clone(), session_id.clone(), kind)
        .await
    {
        error!("Session error for {}: {}", session_id, e);
    }
}
