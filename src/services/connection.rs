use crate::{
    config::Config,
    error::{AppError, Result},
    models::connection::{ResolveAction, ResolveOutcome, StatusUpdate},
    services::{
        backend::{bounded, Backend, PrivilegedProcedures},
        notification::NotificationService,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 好友请求处理服务：pending -> accepted | rejected
#[derive(Clone)]
pub struct ConnectionService {
    backend: Arc<dyn Backend>,
    privileged: Arc<dyn PrivilegedProcedures>,
    notification_service: NotificationService,
    timeout: Duration,
}

impl ConnectionService {
    pub fn new(
        backend: Arc<dyn Backend>,
        privileged: Arc<dyn PrivilegedProcedures>,
        notification_service: NotificationService,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            privileged,
            notification_service,
            timeout: config.backend_timeout(),
        }
    }

    pub async fn accept(&self, user_id: &str, request_id: &str) -> Result<ResolveOutcome> {
        self.resolve(user_id, request_id, ResolveAction::Accept).await
    }

    pub async fn reject(&self, user_id: &str, request_id: &str) -> Result<ResolveOutcome> {
        self.resolve(user_id, request_id, ResolveAction::Reject).await
    }

    /// 处理发给 user_id 的好友请求。
    ///
    /// 接受时依次执行：条件写入状态、重新读取请求、调用特权过程建立双向关系。
    /// 最后一步失败时请求保持 accepted 但没有关系记录，不做自动修复，
    /// 只能由调用方重试 create_connection 或人工处理。
    pub async fn resolve(
        &self,
        user_id: &str,
        request_id: &str,
        action: ResolveAction,
    ) -> Result<ResolveOutcome> {
        debug!("User {} resolving connection request {} with {:?}", user_id, request_id, action);

        let status = action.target_status();
        let update = bounded(
            self.timeout,
            "Connection request status update",
            self.backend.update_request_status(request_id, user_id, status),
        )
        .await
        .map_err(AppError::Update)?;

        match update {
            StatusUpdate::Applied => {
                info!("Connection request {} marked {}", request_id, status);
            }
            StatusUpdate::AlreadyResolved(current) => {
                return Err(AppError::InvalidTransition(format!(
                    "Connection request is already {}",
                    current
                )));
            }
            StatusUpdate::NotFound => return Err(AppError::not_found("Connection request")),
        }

        let connection_created = match action {
            ResolveAction::Accept => {
                self.materialize_connection(request_id).await?;
                true
            }
            ResolveAction::Reject => false,
        };

        // 状态已经落库，刷新失败不影响处理结果
        let notifications = match self.notification_service.refresh(user_id).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!("Failed to refresh feed after resolving {}: {}", request_id, e);
                None
            }
        };

        Ok(ResolveOutcome {
            request_id: request_id.to_string(),
            status,
            connection_created,
            notifications,
        })
    }

    async fn materialize_connection(&self, request_id: &str) -> Result<()> {
        let request = bounded(
            self.timeout,
            "Connection request lookup",
            self.backend.fetch_request(request_id),
        )
        .await
        .map_err(AppError::Fetch)?
        .ok_or_else(|| {
            AppError::Fetch(format!(
                "Connection request {} not found after acceptance",
                request_id
            ))
        })?;

        bounded(
            self.timeout,
            "create_connection",
            self.privileged
                .create_connection(&request.requester_id, &request.recipient_id),
        )
        .await
        .map_err(|e| {
            error!(
                "Connection request {} accepted but connection was not created: {}",
                request_id, e
            );
            AppError::ConnectionCreation(e)
        })?;

        info!(
            "Connection established between {} and {}",
            request.requester_id, request.recipient_id
        );
        Ok(())
    }
}
