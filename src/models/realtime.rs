use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::models::{conversation::Conversation, notification::Notification};

/// 变更订阅所监听的表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTable {
    Notifications,
    ConnectionRequests,
    Conversations,
    Messages,
}

impl FeedTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            FeedTable::Notifications => "notifications",
            FeedTable::ConnectionRequests => "connection_requests",
            FeedTable::Conversations => "conversations",
            FeedTable::Messages => "messages",
        }
    }
}

/// 一个实时会话推送的视图，以及它依赖的表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Notifications,
    Conversations,
}

impl FeedKind {
    pub fn tables(&self) -> &'static [FeedTable] {
        match self {
            FeedKind::Notifications => &[FeedTable::Notifications, FeedTable::ConnectionRequests],
            FeedKind::Conversations => &[FeedTable::Conversations, FeedTable::Messages],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// 后端变更事件；刷新逻辑不读取其内容，只作为触发信号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: FeedTable,
    pub action: ChangeAction,
    pub record_id: Option<String>,
}

impl ChangeEvent {
    pub fn new(table: FeedTable, action: ChangeAction, record_id: impl Into<String>) -> Self {
        Self {
            table,
            action,
            record_id: Some(record_id.into()),
        }
    }
}

/// WebSocket 推送给前端的消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Connected {
        session_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    Feed {
        notifications: Vec<Notification>,
        timestamp: DateTime<Utc>,
    },
    Conversations {
        conversations: Vec<Conversation>,
        timestamp: DateTime<Utc>,
    },
    Error {
        code: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl FeedMessage {
    pub fn connected(session_id: &str, user_id: &str) -> Self {
        FeedMessage::Connected {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn feed(notifications: Vec<Notification>) -> Self {
        FeedMessage::Feed {
            notifications,
            timestamp: Utc::now(),
        }
    }

    pub fn conversations(conversations: Vec<Conversation>) -> Self {
        FeedMessage::Conversations {
            conversations,
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        FeedMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}
