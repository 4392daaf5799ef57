use crate::{
    error::{AppError, Result},
    models::realtime::FeedTable,
    services::backend::Backend,
};
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 实时变更订阅服务
/// 同时监听一个视图依赖的所有表，任何变更都触发一次完整刷新
#[derive(Clone)]
pub struct RealtimeService {
    backend: Arc<dyn Backend>,
}

impl RealtimeService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// 建立订阅。返回的句柄被释放或调用 `unsubscribe` 时，所有变更流一起关闭
    pub async fn subscribe<F, Fut>(
        &self,
        user_id: &str,
        tables: &[FeedTable],
        refresh: F,
    ) -> Result<FeedSubscription>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if tables.is_empty() {
            return Err(AppError::internal("Subscription needs at least one table"));
        }

        let mut streams = Vec::with_capacity(tables.len());
        for table in tables {
            streams.push(self.backend.watch(*table).await?);
        }
        let mut events = futures::stream::select_all(streams);

        let subscriber = user_id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                debug!(
                    "Change on {} ({:?}) for subscriber {}",
                    event.table.table_name(),
                    event.action,
                    subscriber
                );

                // 合并已经就绪的事件，一批变更只刷新一次
                let mut coalesced = 0usize;
                let mut ended = false;
                loop {
                    match events.next().now_or_never() {
                        Some(Some(_)) => coalesced += 1,
                        Some(None) => {
                            ended = true;
                            break;
                        }
                        None => break,
                    }
                }
                if coalesced > 0 {
                    debug!("Coalesced {} additional change events for {}", coalesced, subscriber);
                }

                refresh().await;

                if ended {
                    break;
                }
            }
            warn!("Change feed ended for subscriber {}", subscriber);
        });

        info!("Realtime subscription started for user: {}", user_id);
        Ok(FeedSubscription {
            user_id: user_id.to_string(),
            handle: Some(handle),
        })
    }
}

/// 一个查看会话持有的订阅
pub struct FeedSubscription {
    user_id: String,
    handle: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    pub async fn unsubscribe(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        info!("Realtime subscription released for user: {}", self.user_id);
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Realtime subscription dropped for user: {}", self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        connection::{ConnectionRequest, RequestStatus},
        notification::NotificationRow,
        realtime::FeedKind,
    };
    use crate::services::memory::MemoryBackend;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn notification(id: &str) -> NotificationRow {
        NotificationRow {
            id: id.to_string(),
            recipient_id: None,
            title: "Club fair".to_string(),
            content: "Stalls open at 10am".to_string(),
            category: "clubs".to_string(),
            created_at: Utc::now(),
            sender_id: None,
            sender: None,
        }
    }

    async fn subscribed(
        backend: &Arc<MemoryBackend>,
    ) -> (FeedSubscription, mpsc::UnboundedReceiver<()>) {
        let service = RealtimeService::new(backend.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = service
            .subscribe("uma", FeedKind::Notifications.tables(), move || {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(());
                }
            })
            .await
            .unwrap();
        (subscription, rx)
    }

    async fn next_refresh(rx: &mut mpsc::UnboundedReceiver<()>) -> Option<()> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_refresh_fires_for_both_tables() {
        let backend = Arc::new(MemoryBackend::new());
        let (subscription, mut rx) = subscribed(&backend).await;
        assert!(subscription.is_active());
        assert_eq!(subscription.user_id(), "uma");

        backend.insert_notification(notification("n1"));
        assert_eq!(next_refresh(&mut rx).await, Some(()));

        backend.insert_connection_request(ConnectionRequest {
            id: "r1".to_string(),
            requester_id: "rohan".to_string(),
            recipient_id: "uma".to_string(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            requester: None,
        });
        assert_eq!(next_refresh(&mut rx).await, Some(()));

        assert!(backend.delete_connection_request("r1"));
        assert_eq!(next_refresh(&mut rx).await, Some(()));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_refreshes() {
        let backend = Arc::new(MemoryBackend::new());
        let (subscription, mut rx) = subscribed(&backend).await;
        assert_eq!(backend.subscriber_count(), 2);

        subscription.unsubscribe().await;
        assert_eq!(backend.subscriber_count(), 0);

        backend.insert_notification(notification("n1"));
        assert_eq!(next_refresh(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_streams() {
        let backend = Arc::new(MemoryBackend::new());
        let (subscription, _rx) = subscribed(&backend).await;
        assert_eq!(backend.subscriber_count(), 2);

        drop(subscription);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_conversation_feed_ignores_notification_tables() {
        let backend = Arc::new(MemoryBackend::new());
        let service = RealtimeService::new(backend.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = service
            .subscribe("uma", FeedKind::Conversations.tables(), move || {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(());
                }
            })
            .await
            .unwrap();

        backend.insert_notification(notification("n1"));
        assert_eq!(next_refresh(&mut rx).await, None);

        backend.open_conversation("uma", "rohan").await.unwrap();
        assert_eq!(next_refresh(&mut rx).await, Some(()));

        subscription.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_subscribe_without_tables_fails() {
        let service = RealtimeService::new(Arc::new(MemoryBackend::new()));
        let result = service.subscribe("uma", &[], || async {}).await;
        assert!(result.is_err());
    }
}
