use crate::{error::{AppError, Result}, state::AppState};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Query},
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
    RequestPartsExt, TypedHeader,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// 已认证的调用方
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

// Axum extractor for authentication
#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        // 优先使用 Authorization 头；浏览器的 WebSocket 无法设置请求头，回退到 access_token 查询参数
        let token = match parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
            Ok(TypedHeader(Authorization(bearer))) => bearer.token().to_string(),
            Err(_) => parts
                .extract::<Query<TokenQuery>>()
                .await
                .ok()
                .and_then(|Query(query)| query.access_token)
                .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?,
        };

        let claims = state.auth_service.verify_jwt(&token)?;
        debug!("Authenticated user: {}", claims.sub);

        Ok(AuthUser { id: claims.sub })
    }
}

/// 请求日志中间件
pub async fn request_logging_middleware(request: Request<Body>, next: Next<Body>) -> Response {
    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let start_time = std::time::Instant::now();

    debug!("Incoming request: {} {}", method, uri);

    let response = next.run(request).await;

    info!(
        "Request completed: {} {} {} - {}ms",
        method,
        uri,
        response.status().as_u16(),
        start_time.elapsed().as_millis()
    );

    response
}
