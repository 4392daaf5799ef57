use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{
    connection::{ConnectionRequest, RequestStatus, StatusUpdate},
    conversation::{conversation_key, ConversationRecord, MessageRecord},
    notification::NotificationRow,
    profile::ProfileSummary,
    realtime::{ChangeAction, ChangeEvent, FeedTable},
};
use crate::services::backend::{Backend, ChangeStream, PrivilegedProcedures, USER_SEARCH_LIMIT};
use crate::utils::serde_helpers::{record_id, strip_record_prefix};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::{Database as DatabaseCredentials, Root};
use surrealdb::{Action, Surreal};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// 特权会话在启动时定义的表、create_connection 函数和消息事件。
/// 两个会话都是系统用户，表级 PERMISSIONS 对它们不生效；
/// connections 只在 fn::create_connection 内写入，`Backend` 不提供任何写它的操作。
/// connections 使用 [follower, following] 作为记录 ID，重复调用不会产生重复行。
const SCHEMA: &str = r#"
    DEFINE TABLE profiles SCHEMALESS;
    DEFINE TABLE notifications SCHEMALESS;
    DEFINE INDEX notifications_recipient ON notifications FIELDS recipient_id;
    DEFINE TABLE connection_requests SCHEMALESS;
    DEFINE INDEX connection_requests_recipient ON connection_requests FIELDS recipient_id, status;
    DEFINE TABLE connections SCHEMALESS;
    DEFINE INDEX connections_follower ON connections FIELDS follower_id;
    DEFINE TABLE conversations SCHEMALESS;
    DEFINE TABLE messages SCHEMALESS;
    DEFINE INDEX messages_conversation ON messages FIELDS conversation_id;

    DEFINE EVENT message_touches_conversation ON TABLE messages WHEN $event = "CREATE" THEN (
        UPDATE type::thing('conversations', $after.conversation_id) SET updated_at = $after.created_at
    );

    DEFINE FUNCTION fn::create_connection($follower: string, $following: string) {
        IF $follower = $following {
            THROW "cannot connect a user to themselves";
        };
        UPDATE type::thing('connections', [$follower, $following]) CONTENT {
            follower_id: $follower,
            following_id: $following,
            created_at: time::now()
        };
        UPDATE type::thing('connections', [$following, $follower]) CONTENT {
            follower_id: $following,
            following_id: $follower,
            created_at: time::now()
        };
        RETURN true;
    };
"#;

const NOTIFICATIONS_QUERY: &str = r#"
    SELECT meta::id(id) AS id, recipient_id, title, content, category, created_at, sender_id
    FROM notifications
    WHERE recipient_id = NONE OR recipient_id = NULL OR recipient_id = $viewer_id;
"#;

const PENDING_REQUESTS_QUERY: &str = r#"
    SELECT meta::id(id) AS id, requester_id, recipient_id, status, created_at
    FROM connection_requests
    WHERE recipient_id = $recipient_id AND status = 'pending';
"#;

const REQUEST_QUERY: &str = r#"
    SELECT meta::id(id) AS id, requester_id, recipient_id, status, created_at
    FROM connection_requests
    WHERE meta::id(id) = $request_id;
"#;

// 条件写入：只有 pending 且属于当前用户的请求会被更新
const UPDATE_STATUS_QUERY: &str = r#"
    UPDATE connection_requests SET status = $status
    WHERE meta::id(id) = $request_id
        AND recipient_id = $recipient_id
        AND status = 'pending'
    RETURN meta::id(id) AS id;
"#;

const PROFILES_QUERY: &str = r#"
    SELECT meta::id(id) AS id, full_name, avatar_url
    FROM profiles
    WHERE meta::id(id) INSIDE $ids;
"#;

const CONVERSATIONS_QUERY: &str = r#"
    SELECT meta::id(id) AS id, participant_ids, updated_at
    FROM conversations
    WHERE $participant_id INSIDE participant_ids;
"#;

const MESSAGES_QUERY: &str = r#"
    SELECT meta::id(id) AS id, conversation_id, sender_id, content, created_at, read_at
    FROM messages
    WHERE conversation_id INSIDE $conversation_ids;
"#;

const CONTACT_IDS_QUERY: &str = r#"
    SELECT VALUE following_id FROM connections WHERE follower_id = $user_id;
"#;

const SEARCH_PROFILES_QUERY: &str = r#"
    SELECT meta::id(id) AS id, full_name, avatar_url
    FROM profiles
    WHERE meta::id(id) != $exclude_id
        AND string::lowercase(full_name ?? '') CONTAINS string::lowercase($query)
    ORDER BY full_name
    LIMIT $limit;
"#;

// 以排序后的参与者拼出确定的记录键，已存在时只保留原 updated_at
const OPEN_CONVERSATION_QUERY: &str = r#"
    UPDATE type::thing('conversations', $key)
    SET participant_ids = $participant_ids, updated_at = updated_at ?? time::now()
    RETURN AFTER;
"#;

#[derive(Debug, Deserialize)]
struct RecordKey {
    #[serde(with = "record_id")]
    #[allow(dead_code)]
    id: String,
}

/// 普通会话的数据库服务
#[derive(Clone)]
pub struct Database {
    client: Surreal<Any>,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let client = any::connect(config.database_url.as_str()).await?;
        client
            .signin(DatabaseCredentials {
                namespace: &config.database_namespace,
                database: &config.database_name,
                username: &config.database_username,
                password: &config.database_password,
            })
            .await?;
        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self { client })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match self.client.query("INFO FOR DB").await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(AppError::from(e))
            }
        }
    }

    async fn profiles_by_id<I>(&self, ids: I) -> Result<HashMap<String, ProfileSummary>>
    where
        I: IntoIterator<Item = String>,
    {
        let ids: Vec<String> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let profiles = self.fetch_profiles(&ids).await?;
        Ok(profiles.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    async fn join_requesters(&self, mut requests: Vec<ConnectionRequest>) -> Result<Vec<ConnectionRequest>> {
        let profiles = self
            .profiles_by_id(requests.iter().map(|r| r.requester_id.clone()))
            .await?;
        for request in &mut requests {
            request.requester = profiles.get(&request.requester_id).cloned();
        }
        Ok(requests)
    }
}

#[async_trait]
impl Backend for Database {
    async fn fetch_notifications(&self, viewer_id: &str) -> Result<Vec<NotificationRow>> {
        debug!("Fetching notifications visible to {}", viewer_id);

        let mut response = self
            .client
            .query(NOTIFICATIONS_QUERY)
            .bind(("viewer_id", viewer_id.to_string()))
            .await?;
        let mut rows: Vec<NotificationRow> = response.take(0)?;

        let profiles = self
            .profiles_by_id(rows.iter().filter_map(|row| row.sender_id.clone()))
            .await?;
        for row in &mut rows {
            row.sender = row.sender_id.as_ref().and_then(|id| profiles.get(id).cloned());
        }

        Ok(rows)
    }

    async fn fetch_pending_requests(&self, recipient_id: &str) -> Result<Vec<ConnectionRequest>> {
        debug!("Fetching pending connection requests for {}", recipient_id);

        let mut response = self
            .client
            .query(PENDING_REQUESTS_QUERY)
            .bind(("recipient_id", recipient_id.to_string()))
            .await?;
        let requests: Vec<ConnectionRequest> = response.take(0)?;

        self.join_requesters(requests).await
    }

    async fn fetch_request(&self, request_id: &str) -> Result<Option<ConnectionRequest>> {
        let mut response = self
            .client
            .query(REQUEST_QUERY)
            .bind(("request_id", request_id.to_string()))
            .await?;
        let requests: Vec<ConnectionRequest> = response.take(0)?;

        Ok(self.join_requesters(requests).await?.into_iter().next())
    }

    async fn update_request_status(
        &self,
        request_id: &str,
        recipient_id: &str,
        status: RequestStatus,
    ) -> Result<StatusUpdate> {
        let mut response = self
            .client
            .query(UPDATE_STATUS_QUERY)
            .bind(("request_id", request_id.to_string()))
            .bind(("recipient_id", recipient_id.to_string()))
            .bind(("status", status.as_str()))
            .await?;
        let updated: Vec<RecordKey> = response.take(0)?;

        if !updated.is_empty() {
            return Ok(StatusUpdate::Applied);
        }

        // 没有写入：区分不存在 / 不属于当前用户 / 已处理
        match self.fetch_request(request_id).await? {
            Some(request) if request.recipient_id == recipient_id && request.status.is_terminal() => {
                Ok(StatusUpdate::AlreadyResolved(request.status))
            }
            Some(request) if request.recipient_id == recipient_id => Err(AppError::Internal(format!(
                "Status write for pending request {} was not applied",
                request.id
            ))),
            _ => Ok(StatusUpdate::NotFound),
        }
    }

    async fn fetch_conversations(&self, participant_id: &str) -> Result<Vec<ConversationRecord>> {
        debug!("Fetching conversations for {}", participant_id);

        let mut response = self
            .client
            .query(CONVERSATIONS_QUERY)
            .bind(("participant_id", participant_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    async fn fetch_messages(&self, conversation_ids: &[String]) -> Result<Vec<MessageRecord>> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = self
            .client
            .query(MESSAGES_QUERY)
            .bind(("conversation_ids", conversation_ids.to_vec()))
            .await?;
        Ok(response.take(0)?)
    }

    async fn fetch_profiles(&self, ids: &[String]) -> Result<Vec<ProfileSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = self
            .client
            .query(PROFILES_QUERY)
            .bind(("ids", ids.to_vec()))
            .await?;
        Ok(response.take(0)?)
    }

    async fn fetch_contacts(&self, user_id: &str) -> Result<Vec<ProfileSummary>> {
        let mut response = self
            .client
            .query(CONTACT_IDS_QUERY)
            .bind(("user_id", user_id.to_string()))
            .await?;
        let contact_ids: Vec<String> = response.take(0)?;

        let profiles = self.profiles_by_id(contact_ids.iter().cloned()).await?;
        Ok(contact_ids
            .into_iter()
            .map(|id| {
                profiles
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| ProfileSummary::new(id, None))
            })
            .collect())
    }

    async fn search_profiles(&self, query: &str, exclude_id: &str) -> Result<Vec<ProfileSummary>> {
        let mut response = self
            .client
            .query(SEARCH_PROFILES_QUERY)
            .bind(("query", query.to_string()))
            .bind(("exclude_id", exclude_id.to_string()))
            .bind(("limit", USER_SEARCH_LIMIT))
            .await?;
        Ok(response.take(0)?)
    }

    async fn open_conversation(&self, user_id: &str, friend_id: &str) -> Result<ConversationRecord> {
        let mut participant_ids = vec![user_id.to_string(), friend_id.to_string()];
        participant_ids.sort();

        let mut response = self
            .client
            .query(OPEN_CONVERSATION_QUERY)
            .bind(("key", conversation_key(user_id, friend_id)))
            .bind(("participant_ids", participant_ids))
            .await?;
        let record: Option<ConversationRecord> = response.take(0)?;

        record.ok_or_else(|| AppError::internal("Conversation upsert returned no record"))
    }

    async fn watch(&self, table: FeedTable) -> Result<ChangeStream> {
        let client = self.client.clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut live = match client.select::<Vec<Value>>(table.table_name()).live().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            loop {
                tokio::select! {
                    // 订阅方释放了事件流，不必等到下一次变更
                    _ = events_tx.closed() => {
                        debug!("Change stream on {} released", table.table_name());
                        break;
                    }
                    item = live.next() => match item {
                        Some(Ok(notification)) => {
                            let action = match notification.action {
                                Action::Create => ChangeAction::Insert,
                                Action::Delete => ChangeAction::Delete,
                                _ => ChangeAction::Update,
                            };
                            let event = ChangeEvent {
                                table,
                                action,
                                record_id: live_record_id(&notification.data),
                            };
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => warn!("Live query error on {}: {}", table.table_name(), e),
                        None => break,
                    },
                }
            }

            // 丢弃 live 流时 SDK 会 KILL 对应的 live query
            drop(live);
            debug!("Live query on {} finished", table.table_name());
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Live query started on {}", table.table_name());
                Ok(receiver_stream(events_rx))
            }
            Ok(Err(e)) => Err(AppError::from(e)),
            Err(_) => Err(AppError::internal("Live query task exited before starting")),
        }
    }
}

/// 把 mpsc 接收端包装成事件流；流被丢弃时接收端随之关闭，发送方的 `closed()` 就绪
fn receiver_stream(receiver: mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeStream {
    futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|event| (event, receiver))
    })
    .boxed()
}

/// live query 推送的数据里取出记录键，格式随动作不同而不同
fn live_record_id(data: &Value) -> Option<String> {
    match data {
        Value::String(raw) => Some(strip_record_prefix(raw)),
        Value::Object(map) => map.get("id").and_then(live_record_id),
        _ => None,
    }
}

/// 以 root 身份登录的特权会话，只负责 schema 初始化和 create_connection
#[derive(Clone)]
pub struct PrivilegedGateway {
    client: Surreal<Any>,
}

impl PrivilegedGateway {
    pub async fn connect(config: &Config) -> Result<Self> {
        info!("Opening privileged session to {}", config.database_url);

        let client = any::connect(config.database_url.as_str()).await?;
        client
            .signin(Root {
                username: &config.privileged_username,
                password: &config.privileged_password,
            })
            .await?;
        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.client.query(SCHEMA).await?.check()?;
        info!("Database schema ensured");
        Ok(())
    }
}

#[async_trait]
impl PrivilegedProcedures for PrivilegedGateway {
    async fn create_connection(&self, follower_id: &str, following_id: &str) -> Result<()> {
        debug!("Calling create_connection({}, {})", follower_id, following_id);

        let response = self
            .client
            .query("RETURN fn::create_connection($follower, $following);")
            .bind(("follower", follower_id.to_string()))
            .bind(("following", following_id.to_string()))
            .await?;
        response.check()?;

        info!("Connection created between {} and {}", follower_id, following_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_record_id_shapes() {
        assert_eq!(live_record_id(&json!("connection_requests:r1")), Some("r1".to_string()));
        assert_eq!(
            live_record_id(&json!({ "id": "notifications:n1", "title": "x" })),
            Some("n1".to_string())
        );
        assert_eq!(live_record_id(&json!(42)), None);
    }

    #[test]
    fn test_schema_writes_connections_only_inside_create_connection() {
        let (tables, function) = SCHEMA
            .split_once("DEFINE FUNCTION fn::create_connection")
            .unwrap();
        assert!(!tables.contains("'connections'"));
        assert!(!SCHEMA.contains("PERMISSIONS"));
        assert_eq!(function.matches("type::thing('connections'").count(), 2);
    }

    #[tokio::test]
    async fn test_dropping_receiver_stream_closes_sender() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = receiver_stream(rx);

        tx.send(ChangeEvent::new(FeedTable::Messages, ChangeAction::Insert, "m1")).unwrap();
        assert_eq!(stream.next().await.unwrap().record_id.as_deref(), Some("m1"));

        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(1), tx.closed())
            .await
            .unwrap();
        assert!(tx.is_closed());
    }
}
