use crate::{
    error::Result,
    models::realtime::{FeedKind, FeedMessage},
    services::{
        conversation::ConversationService, notification::NotificationService,
        realtime::{FeedSubscription, RealtimeService},
    },
};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 客户端可以发送该文本帧主动要求刷新
const REFRESH_COMMAND: &str = "refresh";

/// 通知页 / 消息页的 WebSocket 会话：连接期间持有一个实时订阅，断开时释放
#[derive(Clone)]
pub struct WebSocketService {
    notification_service: NotificationService,
    conversation_service: ConversationService,
    realtime_service: RealtimeService,
}

impl WebSocketService {
    pub fn new(
        notification_service: NotificationService,
        conversation_service: ConversationService,
        realtime_service: RealtimeService,
    ) -> Self {
        Self {
            notification_service,
            conversation_service,
            realtime_service,
        }
    }

    /// 处理新的WebSocket连接
    pub async fn handle_connection(
        &self,
        websocket: WebSocket,
        user_id: String,
        session_id: String,
        kind: FeedKind,
    ) -> Result<()> {
        info!("New {:?} session: {} for user: {}", kind, session_id, user_id);

        let (mut ws_tx, mut ws_rx) = websocket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<FeedMessage>();

        // 处理发送消息任务
        let send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize feed message: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let _ = tx.send(FeedMessage::connected(&session_id, &user_id));

        let subscription = match self.open_subscription(&user_id, &tx, kind).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to subscribe session {}: {}", session_id, e);
                let _ = tx.send(FeedMessage::error(e.code(), &e.public_message()));
                drop(tx);
                let _ = send_task.await;
                return Err(e);
            }
        };

        // 先订阅再推送首屏，订阅建立之后的变更都会触发刷新
        self.push_snapshot(kind, &user_id, &tx).await;

        // 处理接收消息
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) if text.trim() == REFRESH_COMMAND => {
                    self.push_snapshot(kind, &user_id, &tx).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error on session {}: {}", session_id, e);
                    break;
                }
            }
        }

        subscription.unsubscribe().await;
        send_task.abort();

        info!("Session closed: {} for user: {}", session_id, user_id);
        Ok(())
    }

    async fn open_subscription(
        &self,
        user_id: &str,
        tx: &mpsc::UnboundedSender<FeedMessage>,
        kind: FeedKind,
    ) -> Result<FeedSubscription> {
        let service = self.clone();
        let tx = tx.clone();
        let subscriber = user_id.to_string();

        self.realtime_service
            .subscribe(user_id, kind.tables(), move || {
                let service = service.clone();
                let tx = tx.clone();
                let subscriber = subscriber.clone();
                async move {
                    service.push_snapshot(kind, &subscriber, &tx).await;
                }
            })
            .await
    }

    /// 当前视图的完整快照；失败时是用户可见的错误提示，会话继续
    pub async fn snapshot(&self, kind: FeedKind, user_id: &str) -> FeedMessage {
        let result = match kind {
            FeedKind::Notifications => self
                .notification_service
                .refresh(user_id)
                .await
                .map(FeedMessage::feed),
            FeedKind::Conversations => self
                .conversation_service
                .list(user_id)
                .await
                .map(FeedMessage::conversations),
        };

        result.unwrap_or_else(|e| {
            warn!("{:?} refresh failed for {}: {}", kind, user_id, e);
            FeedMessage::error(e.code(), &e.public_message())
        })
    }

    async fn push_snapshot(
        &self,
        kind: FeedKind,
        user_id: &str,
        tx: &mpsc::UnboundedSender<FeedMessage>,
    ) {
        let message = self.snapshot(kind, user_id).await;
        if tx.send(message).is_err() {
            debug!("Session for {} already closed", user_id);
        }
    }
}
