use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        conversation::{Conversation, ConversationRecord, LastMessage, MessageRecord, OpenedConversation},
        profile::ProfileSummary,
    },
    services::backend::{bounded, Backend},
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 消息页的会话列表与联系人
#[derive(Clone)]
pub struct ConversationService {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl ConversationService {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            timeout: config.backend_timeout(),
        }
    }

    /// 重新拉取 user 的会话列表，最近活动的排在前面
    pub async fn list(&self, user_id: &str) -> Result<Vec<Conversation>> {
        debug!("Refreshing conversations for user: {}", user_id);

        let records = bounded(
            self.timeout,
            "Conversation fetch",
            self.backend.fetch_conversations(user_id),
        )
        .await
        .map_err(AppError::Fetch)?;

        let conversation_ids: Vec<String> = records.iter().map(|c| c.id.clone()).collect();
        let messages = bounded(
            self.timeout,
            "Message fetch",
            self.backend.fetch_messages(&conversation_ids),
        )
        .await
        .map_err(AppError::Fetch)?;

        let participant_ids: Vec<String> = records
            .iter()
            .flat_map(|c| c.participant_ids.iter())
            .filter(|id| id.as_str() != user_id)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let profiles = bounded(
            self.timeout,
            "Participant fetch",
            self.backend.fetch_profiles(&participant_ids),
        )
        .await
        .map_err(AppError::Fetch)?;

        Ok(assemble_conversations(user_id, records, messages, profiles))
    }

    pub async fn contacts(&self, user_id: &str) -> Result<Vec<ProfileSummary>> {
        bounded(self.timeout, "Contact fetch", self.backend.fetch_contacts(user_id))
            .await
            .map_err(AppError::Fetch)
    }

    /// 按姓名搜索用户；空查询返回联系人
    pub async fn search_users(&self, user_id: &str, query: &str) -> Result<Vec<ProfileSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return self.contacts(user_id).await;
        }

        debug!("User {} searching profiles for '{}'", user_id, query);
        bounded(
            self.timeout,
            "Profile search",
            self.backend.search_profiles(query, user_id),
        )
        .await
        .map_err(AppError::Fetch)
    }

    /// 打开与 friend 的会话（已存在则复用），并返回刷新后的会话列表
    pub async fn create_conversation(&self, user_id: &str, friend_id: &str) -> Result<OpenedConversation> {
        let friend_id = friend_id.trim();
        if friend_id.is_empty() {
            return Err(AppError::bad_request("friend_id is required"));
        }
        if friend_id == user_id {
            return Err(AppError::bad_request("Cannot start a conversation with yourself"));
        }

        let record = bounded(
            self.timeout,
            "Conversation upsert",
            self.backend.open_conversation(user_id, friend_id),
        )
        .await
        .map_err(AppError::Update)?;
        info!("User {} opened conversation {}", user_id, record.id);

        let conversations = match self.list(user_id).await {
            Ok(conversations) => Some(conversations),
            Err(e) => {
                warn!("Failed to refresh conversations after opening {}: {}", record.id, e);
                None
            }
        };

        Ok(OpenedConversation {
            conversation_id: record.id,
            conversations,
        })
    }
}

/// 组装会话列表：其他参与者、最后一条消息、未读数，按最近活动倒序（稳定排序）
pub fn assemble_conversations(
    viewer_id: &str,
    records: Vec<ConversationRecord>,
    messages: Vec<MessageRecord>,
    profiles: Vec<ProfileSummary>,
) -> Vec<Conversation> {
    let profiles: HashMap<String, ProfileSummary> =
        profiles.into_iter().map(|p| (p.id.clone(), p)).collect();

    let mut by_conversation: HashMap<&str, Vec<&MessageRecord>> = HashMap::new();
    for message in &messages {
        by_conversation
            .entry(message.conversation_id.as_str())
            .or_default()
            .push(message);
    }

    let mut conversations: Vec<Conversation> = records
        .into_iter()
        .filter(|record| record.includes(viewer_id))
        .map(|record| {
            let thread = by_conversation.get(record.id.as_str());
            let last_message = thread
                .and_then(|thread| thread.iter().max_by_key(|m| m.created_at))
                .map(|m| LastMessage::from(*m));
            let unread_count = thread.map_or(0, |thread| {
                thread.iter().filter(|m| m.is_unread_by(viewer_id)).count()
            });
            let participants = record
                .participant_ids
                .iter()
                .filter(|id| id.as_str() != viewer_id)
                .map(|id| {
                    profiles
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| ProfileSummary::new(id.clone(), None))
                })
                .collect();

            Conversation {
                id: record.id,
                updated_at: record.updated_at,
                participants,
                last_message,
                unread_count,
            }
        })
        .collect();

    conversations.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    conversations
}
