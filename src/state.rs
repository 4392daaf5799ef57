use std::sync::Arc;

use crate::{
    config::Config,
    services::{
        AuthService, Backend, ConnectionService, ConversationService, NotificationService,
        PrivilegedProcedures, RealtimeService, WebSocketService,
    },
};

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 认证服务
    pub auth_service: AuthService,

    /// 通知聚合服务
    pub notification_service: NotificationService,

    /// 好友请求处理服务
    pub connection_service: ConnectionService,

    /// 消息页会话列表与联系人
    pub conversation_service: ConversationService,

    /// 通知页 / 消息页 WebSocket 会话
    pub websocket_service: WebSocketService,
}

impl AppState {
    pub fn new(
        config: Config,
        backend: Arc<dyn Backend>,
        privileged: Arc<dyn PrivilegedProcedures>,
    ) -> Self {
        let auth_service = AuthService::new(&config);
        let notification_service = NotificationService::new(backend.clone(), &config);
        let connection_service = ConnectionService::new(
            backend.clone(),
            privileged,
            notification_service.clone(),
            &config,
        );
        let conversation_service = ConversationService::new(backend.clone(), &config);
        let websocket_service = WebSocketService::new(
            notification_service.clone(),
            conversation_service.clone(),
            RealtimeService::new(backend),
        );

        Self {
            config,
            auth_service,
            notification_service,
            connection_service,
            conversation_service,
            websocket_service,
        }
    }
}
