use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::{models::profile::ProfileSummary, utils::serde_helpers::record_id};

/// 两人会话的确定性记录键，与参与者顺序无关
pub fn conversation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

/// conversations 表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(with = "record_id")]
    pub id: String,
    pub participant_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn includes(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }
}

/// messages 表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(with = "record_id")]
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// 对 viewer 来说是否未读：别人发来且尚未标记已读
    pub fn is_unread_by(&self, viewer_id: &str) -> bool {
        self.sender_id != viewer_id && self.read_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<&MessageRecord> for LastMessage {
    fn from(message: &MessageRecord) -> Self {
        Self {
            content: message.content.clone(),
            created_at: message.created_at,
            read_at: message.read_at,
        }
    }
}

/// 会话列表中的一项；participants 不包含查看者本人
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<ProfileSummary>,
    pub last_message: Option<LastMessage>,
    pub unread_count: usize,
}

impl Conversation {
    /// 最近一次活动时间，用于排序
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map_or(self.updated_at, |message| message.created_at.max(self.updated_at))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    pub friend_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenedConversation {
    pub conversation_id: String,
    /// 打开后重新拉取的会话列表；刷新失败时为空
    pub conversations: Option<Vec<Conversation>>,
}
