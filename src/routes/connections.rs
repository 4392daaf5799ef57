use crate::{
    error::Result,
    models::connection::{ResolveAction, ResolveRequestBody},
    state::AppState,
    utils::middleware::AuthUser,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests/:request_id/resolve", post(resolve_request))
        .route("/requests/:request_id/accept", post(accept_request))
        .route("/requests/:request_id/reject", post(reject_request))
}

/// 处理好友请求
/// POST /api/connections/requests/:request_id/resolve
async fn resolve_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<String>,
    Json(payload): Json<ResolveRequestBody>,
) -> Result<Json<Value>> {
    resolve(&state, &user, &request_id, ResolveAction::from_accept(payload.accept)).await
}

/// 接受好友请求
/// POST /api/connections/requests/:request_id/accept
async fn accept_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<Value>> {
    resolve(&state, &user, &request_id, ResolveAction::Accept).await
}

/// 拒绝好友请求
/// POST /api/connections/requests/:request_id/reject
async fn reject_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<Value>> {
    resolve(&state, &user, &request_id, ResolveAction::Reject).await
}

async fn resolve(
    state: &AppState,
    user: &AuthUser,
    request_id: &str,
    action: ResolveAction,
) -> Result<Json<Value>> {
    debug!("User {} {:?} connection request {}", user.id, action, request_id);

    let outcome = state
        .connection_service
        .resolve(&user.id, request_id, action)
        .await?;

    let message = match action {
        ResolveAction::Accept => "Connection request accepted",
        ResolveAction::Reject => "Connection request rejected",
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": outcome
    })))
}
