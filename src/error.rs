use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Update error: {0}")]
    Update(String),

    #[error("Connection creation error: {0}")]
    ConnectionCreation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Fetch(_) => "FETCH_ERROR",
            AppError::Update(_) => "UPDATE_ERROR",
            AppError::ConnectionCreation(_) => "CONNECTION_CREATION_ERROR",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Jwt(_) => "JWT_ERROR",
        }
    }

    /// 用户可见的提示信息，后端细节只写日志
    pub fn public_message(&self) -> String {
        match self {
            AppError::Fetch(_) => "Failed to load notifications".to_string(),
            AppError::Update(_) | AppError::ConnectionCreation(_) => {
                "Failed to process connection request".to_string()
            }
            AppError::InvalidTransition(msg)
            | AppError::Authentication(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg) => msg.clone(),
            AppError::Database(_) => "Database error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Serialization(_) => "Serialization error".to_string(),
            AppError::Jwt(_) => "Invalid token".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Fetch(_) | AppError::Update(_) | AppError::ConnectionCreation(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::Authentication(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) | AppError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Fetch(_)
            | AppError::Update(_)
            | AppError::ConnectionCreation(_)
            | AppError::Database(_)
            | AppError::Internal(_)
            | AppError::Serialization(_) => {
                tracing::error!("{}", self);
            }
            AppError::Jwt(e) => {
                tracing::debug!("JWT error: {}", e);
            }
            _ => {}
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message()
            }
        }));

        (self.status_code(), body).into_response()
    }
}

// 便利函数，用于创建常见错误
impl AppError {
    pub fn not_found(resource: &str) -> Self {
        Self::NotFound(format!("{} not found", resource))
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::Authentication(msg.to_string())
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::BadRequest(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }
}

// 从其他错误类型转换
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Fetch("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::InvalidTransition("already accepted".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::not_found("Connection request").status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_public_message_hides_backend_detail() {
        let err = AppError::ConnectionCreation("permission denied for table connections".into());
        assert_eq!(err.public_message(), "Failed to process connection request");
        assert_eq!(err.code(), "CONNECTION_CREATION_ERROR");
    }
}
