use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// 使用进程内存储而不是连接 SurrealDB
pub const MEMORY_DATABASE_URL: &str = "memory";

const DEFAULT_LOG_FILTER: &str = "campus_connect=debug,tower_http=debug";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    /// EnvFilter 指令，例如 `campus_connect=debug,tower_http=info`
    pub log_level: String,

    // Database configuration
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // 特权会话，仅用于执行 create_connection
    pub privileged_username: String,
    pub privileged_password: String,

    // Authentication configuration
    pub jwt_secret: String,

    // 后端调用超时（秒）
    pub backend_timeout_secs: u64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if environment == "development" => "development-secret".to_string(),
            Err(_) => anyhow::bail!("JWT_SECRET must be set"),
        };

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "ws://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "campus".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "connect".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "app".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "app".to_string()),

            privileged_username: env::var("PRIVILEGED_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            privileged_password: env::var("PRIVILEGED_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            jwt_secret,

            backend_timeout_secs: env::var("BACKEND_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
        })
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs.max(1))
    }

    pub fn uses_memory_backend(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: DEFAULT_LOG_FILTER.to_string(),
            database_url: MEMORY_DATABASE_URL.to_string(),
            database_namespace: "campus".to_string(),
            database_name: "connect".to_string(),
            database_username: "app".to_string(),
            database_password: "app".to_string(),
            privileged_username: "root".to_string(),
            privileged_password: "root".to_string(),
            jwt_secret: "development-secret".to_string(),
            backend_timeout_secs: 10,
            cors_allowed_origins: "http://localhost:5173".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_memory_backend() {
        let config = Config::default();
        assert!(config.uses_memory_backend());
        assert!(!config.is_production());
        assert!(config.log_level.contains("campus_connect="));
        assert_eq!(config.backend_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_backend_timeout_has_floor() {
        let config = Config {
            backend_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.backend_timeout(), Duration::from_secs(1));
    }
}
