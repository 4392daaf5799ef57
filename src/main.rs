use std::sync::Arc;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{error, info};

use campus_connect::{
    config::Config,
    routes,
    services::{Backend, Database, MemoryBackend, PrivilegedGateway, PrivilegedProcedures},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 加载配置
    let config = Config::from_env()?;

    // 初始化日志；生产环境输出 JSON
    let json_logs = config.is_production();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!("Starting Campus Connect service...");

    let (backend, privileged) = connect_backend(&config).await?;

    // 创建应用状态
    let app_state = Arc::new(AppState::new(config.clone(), backend, privileged));

    // 配置 CORS
    let origins = config
        .cors_allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(origins);

    let app = routes::app(app_state).layer(cors);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Campus Connect stopped");
    Ok(())
}

/// 根据 DATABASE_URL 选择后端；`memory` 使用进程内存储
async fn connect_backend(
    config: &Config,
) -> anyhow::Result<(Arc<dyn Backend>, Arc<dyn PrivilegedProcedures>)> {
    if config.uses_memory_backend() {
        info!("Using in-memory backend");
        let memory = Arc::new(MemoryBackend::new());
        let backend: Arc<dyn Backend> = memory.clone();
        let privileged: Arc<dyn PrivilegedProcedures> = memory;
        return Ok((backend, privileged));
    }

    let gateway = match PrivilegedGateway::connect(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to open privileged connection: {}", e);
            return Err(anyhow::anyhow!("Privileged gateway initialization failed"));
        }
    };
    gateway.ensure_schema().await?;

    let db = match Database::new(config).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to create database connection: {}", e);
            return Err(anyhow::anyhow!("Database initialization failed"));
        }
    };
    db.verify_connection().await?;
    info!("Database connection established successfully");

    let backend: Arc<dyn Backend> = Arc::new(db);
    let privileged: Arc<dyn PrivilegedProcedures> = Arc::new(gateway);
    Ok((backend, privileged))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
