use crate::{
    error::Result,
    models::conversation::{CreateConversationBody, UserSearchQuery},
    state::AppState,
    utils::middleware::AuthUser,
};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_conversations).post(create_conversation))
        .route("/contacts", get(get_contacts))
        .route("/users/search", get(search_users))
}

/// 会话列表
/// GET /api/conversations
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    debug!("Getting conversations for user: {}", user.id);

    let conversations = state.conversation_service.list(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": conversations
    })))
}

/// 打开（或复用）与好友的会话
/// POST /api/conversations
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CreateConversationBody>,
) -> Result<Json<Value>> {
    debug!("User {} opening conversation with {}", user.id, payload.friend_id);

    let opened = state
        .conversation_service
        .create_conversation(&user.id, &payload.friend_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": opened
    })))
}

/// 联系人列表
/// GET /api/conversations/contacts
async fn get_contacts(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    let contacts = state.conversation_service.contacts(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": contacts
    })))
}

/// GET /api/conversations/users/search?q=
async fn search_users(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<Value>> {
    let users = state
        .conversation_service
        .search_users(&user.id, &query.q)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": users
    })))
}
