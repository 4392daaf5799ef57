use crate::{
    error::{AppError, Result},
    models::notification::DisplayCategory,
    state::AppState,
    utils::middleware::AuthUser,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_feed))
        .route("/categories", get(get_categorized_feed))
        .route("/category/:category", get(get_category))
}

/// 获取合并后的通知 feed
/// GET /api/notifications
async fn get_feed(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    debug!("Getting notification feed for user: {}", user.id);

    let notifications = state.notification_service.refresh(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": notifications
    })))
}

/// 按标签页分组的 feed
/// GET /api/notifications/categories
async fn get_categorized_feed(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>> {
    debug!("Getting categorized feed for user: {}", user.id);

    let feed = state.notification_service.categorized(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": feed
    })))
}

/// 单个分类的通知
/// GET /api/notifications/category/:category
async fn get_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(category): Path<String>,
) -> Result<Json<Value>> {
    debug!("Getting {} notifications for user: {}", category, user.id);

    let category: DisplayCategory = category.parse().map_err(AppError::BadRequest)?;
    let notifications = state
        .notification_service
        .by_category(&user.id, category)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "category": category,
            "notifications": notifications
        }
    })))
}
