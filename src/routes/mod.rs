pub mod connections;
pub mod conversations;
pub mod notifications;
pub mod realtime;

use axum::{extract::State, middleware, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::{state::AppState, utils::middleware::request_logging_middleware};

/// 构建应用路由（CORS 由 main 根据配置添加）
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest("/api/notifications", notifications::router())
        .nest("/api/connections", connections::router())
        .nest("/api/conversations", conversations::router())
        .nest("/api/realtime", realtime::router())
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "service": "campus-connect",
            "environment": state.config.environment,
            "timestamp": chrono::Utc::now()
        }
    }))
}
