use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, Result},
    models::{
        connection::{Connection, ConnectionRequest, RequestStatus, StatusUpdate},
        conversation::{conversation_key, ConversationRecord, MessageRecord},
        notification::NotificationRow,
        profile::ProfileSummary,
        realtime::{ChangeAction, ChangeEvent, FeedTable},
    },
    services::backend::{Backend, ChangeStream, PrivilegedProcedures, USER_SEARCH_LIMIT},
};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct MemoryState {
    profiles: HashMap<String, ProfileSummary>,
    notifications: Vec<NotificationRow>,
    requests: Vec<ConnectionRequest>,
    connections: Vec<Connection>,
    conversations: Vec<ConversationRecord>,
    messages: Vec<MessageRecord>,
}

impl MemoryState {
    fn profile(&self, id: &str) -> Option<ProfileSummary> {
        self.profiles.get(id).cloned()
    }

    fn join_requester(&self, request: &ConnectionRequest) -> ConnectionRequest {
        ConnectionRequest {
            requester: self.profile(&request.requester_id),
            ..request.clone()
        }
    }

    fn profile_or_placeholder(&self, id: &str) -> ProfileSummary {
        self.profile(id).unwrap_or_else(|| ProfileSummary::new(id, None))
    }

    fn has_connection(&self, follower_id: &str, following_id: &str) -> bool {
        self.connections
            .iter()
            .any(|c| c.follower_id == follower_id && c.following_id == following_id)
    }
}

/// 进程内后端：本地开发（DATABASE_URL=memory）和测试使用。
/// 变更通过 broadcast 通道广播给所有订阅者，语义与 SurrealDB 的 live query 一致。
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    changes: broadcast::Sender<ChangeEvent>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            changes,
            latency: Arc::new(Mutex::new(None)),
        }
    }

    /// 模拟托管后端的网络延迟，所有读写操作都会先等待这段时间
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.changes.send(event);
    }

    pub fn insert_profile(&self, profile: ProfileSummary) {
        self.state.write().profiles.insert(profile.id.clone(), profile);
    }

    pub fn insert_notification(&self, row: NotificationRow) {
        let id = row.id.clone();
        self.state.write().notifications.push(row);
        self.publish(ChangeEvent::new(FeedTable::Notifications, ChangeAction::Insert, id));
    }

    pub fn insert_connection_request(&self, request: ConnectionRequest) {
        let id = request.id.clone();
        self.state.write().requests.push(ConnectionRequest {
            requester: None,
            ..request
        });
        self.publish(ChangeEvent::new(FeedTable::ConnectionRequests, ChangeAction::Insert, id));
    }

    pub fn delete_connection_request(&self, request_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.requests.len();
            state.requests.retain(|r| r.id != request_id);
            state.requests.len() != before
        };

        if removed {
            self.publish(ChangeEvent::new(
                FeedTable::ConnectionRequests,
                ChangeAction::Delete,
                request_id,
            ));
        }
        removed
    }

    pub fn request_status(&self, request_id: &str) -> Option<RequestStatus> {
        self.state
            .read()
            .requests
            .iter()
            .find(|r| r.id == request_id)
            .map(|r| r.status)
    }

    /// 写入一条消息并把会话的 updated_at 推进到消息时间
    pub fn insert_message(&self, message: MessageRecord) {
        let id = message.id.clone();
        {
            let mut state = self.state.write();
            if let Some(conversation) = state
                .conversations
                .iter_mut()
                .find(|c| c.id == message.conversation_id)
            {
                conversation.updated_at = conversation.updated_at.max(message.created_at);
            }
            state.messages.push(message);
        }
        self.publish(ChangeEvent::new(FeedTable::Messages, ChangeAction::Insert, id));
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.read().connections.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_notifications(&self, viewer_id: &str) -> Result<Vec<NotificationRow>> {
        self.simulate_latency().await;
        let state = self.state.read();
        Ok(state
            .notifications
            .iter()
            .filter(|row| row.is_visible_to(viewer_id))
            .map(|row| NotificationRow {
                sender: row.sender_id.as_deref().and_then(|id| state.profile(id)),
                ..row.clone()
            })
            .collect())
    }

    async fn fetch_pending_requests(&self, recipient_id: &str) -> Result<Vec<ConnectionRequest>> {
        self.simulate_latency().await;
        let state = self.state.read();
        Ok(state
            .requests
            .iter()
            .filter(|r| r.recipient_id == recipient_id && r.status == RequestStatus::Pending)
            .map(|r| state.join_requester(r))
            .collect())
    }

    async fn fetch_request(&self, request_id: &str) -> Result<Option<ConnectionRequest>> {
        self.simulate_latency().await;
        let state = self.state.read();
        Ok(state
            .requests
            .iter()
            .find(|r| r.id == request_id)
            .map(|r| state.join_requester(r)))
    }

    async fn update_request_status(
        &self,
        request_id: &str,
        recipient_id: &str,
        status: RequestStatus,
    ) -> Result<StatusUpdate> {
        self.simulate_latency().await;
        let outcome = {
            let mut state = self.state.write();
            match state
                .requests
                .iter_mut()
                .find(|r| r.id == request_id && r.recipient_id == recipient_id)
            {
                None => StatusUpdate::NotFound,
                Some(request) if !request.status.can_transition_to(status) => {
                    StatusUpdate::AlreadyResolved(request.status)
                }
                Some(request) => {
                    request.status = status;
                    StatusUpdate::Applied
                }
            }
        };

        if outcome == StatusUpdate::Applied {
            debug!("Connection request {} set to {}", request_id, status);
            self.publish(ChangeEvent::new(
                FeedTable::ConnectionRequests,
                ChangeAction::Update,
                request_id,
            ));
        }
        Ok(outcome)
    }

    async fn fetch_conversations(&self, participant_id: &str) -> Result<Vec<ConversationRecord>> {
        self.simulate_latency().await;
        Ok(self
            .state
            .read()
            .conversations
            .iter()
            .filter(|c| c.includes(participant_id))
            .cloned()
            .collect())
    }

    async fn fetch_messages(&self, conversation_ids: &[String]) -> Result<Vec<MessageRecord>> {
        self.simulate_latency().await;
        Ok(self
            .state
            .read()
            .messages
            .iter()
            .filter(|m| conversation_ids.contains(&m.conversation_id))
            .cloned()
            .collect())
    }

    async fn fetch_profiles(&self, ids: &[String]) -> Result<Vec<ProfileSummary>> {
        self.simulate_latency().await;
        let state = self.state.read();
        Ok(ids.iter().filter_map(|id| state.profile(id)).collect())
    }

    async fn fetch_contacts(&self, user_id: &str) -> Result<Vec<ProfileSummary>> {
        self.simulate_latency().await;
        let state = self.state.read();
        Ok(state
            .connections
            .iter()
            .filter(|c| c.follower_id == user_id)
            .map(|c| state.profile_or_placeholder(&c.following_id))
            .collect())
    }

    async fn search_profiles(&self, query: &str, exclude_id: &str) -> Result<Vec<ProfileSummary>> {
        self.simulate_latency().await;
        let needle = query.to_lowercase();
        let state = self.state.read();
        let mut matches: Vec<ProfileSummary> = state
            .profiles
            .values()
            .filter(|p| p.id != exclude_id)
            .filter(|p| {
                p.display_name()
                    .map_or(false, |name| name.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.full_name.cmp(&b.full_name).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(USER_SEARCH_LIMIT);
        Ok(matches)
    }

    async fn open_conversation(&self, user_id: &str, friend_id: &str) -> Result<ConversationRecord> {
        self.simulate_latency().await;
        let key = conversation_key(user_id, friend_id);
        let created = {
            let mut state = self.state.write();
            if let Some(existing) = state.conversations.iter().find(|c| c.id == key) {
                return Ok(existing.clone());
            }
            let mut participant_ids = vec![user_id.to_string(), friend_id.to_string()];
            participant_ids.sort();
            let record = ConversationRecord {
                id: key,
                participant_ids,
                updated_at: Utc::now(),
            };
            state.conversations.push(record.clone());
            record
        };

        debug!("Conversation {} created", created.id);
        self.publish(ChangeEvent::new(
            FeedTable::Conversations,
            ChangeAction::Insert,
            created.id.clone(),
        ));
        Ok(created)
    }

    async fn watch(&self, table: FeedTable) -> Result<ChangeStream> {
        let receiver = self.changes.subscribe();

        let stream = futures::stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.table == table => return Some((event, receiver)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // 丢了事件也只需要一次刷新
                        warn!("Change feed for {} lagged by {} events", table.table_name(), skipped);
                        let event = ChangeEvent {
                            table,
                            action: ChangeAction::Update,
                            record_id: None,
                        };
                        return Some((event, receiver));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[async_trait]
impl PrivilegedProcedures for MemoryBackend {
    async fn create_connection(&self, follower_id: &str, following_id: &str) -> Result<()> {
        if follower_id == following_id {
            return Err(AppError::bad_request("Cannot connect a user to themselves"));
        }

        let mut state = self.state.write();
        let now = Utc::now();
        for (from, to) in [(follower_id, following_id), (following_id, follower_id)] {
            if !state.has_connection(from, to) {
                state.connections.push(Connection {
                    follower_id: from.to_string(),
                    following_id: to.to_string(),
                    created_at: now,
                });
            }
        }

        info!("Connection created between {} and {}", follower_id, following_id);
        Ok(())
    }
}
