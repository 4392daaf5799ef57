use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::{
    models::{connection::ConnectionRequest, profile::ProfileSummary},
    utils::serde_helpers::record_id,
};

/// 好友请求合成通知的固定字段
pub const CONNECTION_REQUEST_TITLE: &str = "Connection Request";
pub const CONNECTION_ID_PREFIX: &str = "connection-";
const ANONYMOUS_REQUESTER: &str = "Someone";
const UNKNOWN_SENDER: &str = "Unknown User";

/// 通知来源：后端直接写入的通知，或由待处理好友请求派生出的合成通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NotificationOrigin {
    Direct,
    ConnectionRequest { request_id: String },
}

/// 聚合后的通知条目（feed 中的统一展示类型）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: Option<String>,
    pub sender: Option<ProfileSummary>,
    #[serde(flatten)]
    pub origin: NotificationOrigin,
}

impl Notification {
    pub fn is_connection_request(&self) -> bool {
        matches!(self.origin, NotificationOrigin::ConnectionRequest { .. })
    }

    /// 合成通知对应的好友请求 ID
    pub fn request_id(&self) -> Option<&str> {
        match &self.origin {
            NotificationOrigin::ConnectionRequest { request_id } => Some(request_id),
            NotificationOrigin::Direct => None,
        }
    }

    pub fn in_category(&self, category: &str) -> bool {
        self.category.eq_ignore_ascii_case(category)
    }

    /// 将待处理的好友请求转换为通知形状
    pub fn from_connection_request(request: ConnectionRequest) -> Self {
        let requester_name = request
            .requester
            .as_ref()
            .and_then(ProfileSummary::display_name)
            .unwrap_or(ANONYMOUS_REQUESTER)
            .to_string();

        let sender = request.requester.map(|profile| ProfileSummary {
            full_name: Some(
                profile
                    .display_name()
                    .unwrap_or(UNKNOWN_SENDER)
                    .to_string(),
            ),
            ..profile
        });

        Self {
            id: format!("{}{}", CONNECTION_ID_PREFIX, request.id),
            title: CONNECTION_REQUEST_TITLE.to_string(),
            content: format!("{} wants to connect with you", requester_name),
            category: DisplayCategory::Connections.as_str().to_string(),
            created_at: request.created_at,
            sender_id: Some(request.requester_id),
            sender,
            origin: NotificationOrigin::ConnectionRequest {
                request_id: request.id,
            },
        }
    }
}

/// 后端 notifications 表中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    #[serde(with = "record_id")]
    pub id: String,
    /// 为空表示面向所有用户的广播通知
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub title: String,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender: Option<ProfileSummary>,
}

impl NotificationRow {
    pub fn is_visible_to(&self, viewer_id: &str) -> bool {
        self.recipient_id
            .as_deref()
            .map_or(true, |recipient| recipient == viewer_id)
    }
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            content: row.content,
            category: row.category,
            created_at: row.created_at,
            sender_id: row.sender_id,
            sender: row.sender,
            origin: NotificationOrigin::Direct,
        }
    }
}

/// 通知页的固定分类标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayCategory {
    Connections,
    Sports,
    Exams,
    Events,
    Clubs,
    Placements,
    Celebrations,
}

impl DisplayCategory {
    /// 按标签页顺序排列
    pub const ALL: [DisplayCategory; 7] = [
        DisplayCategory::Connections,
        DisplayCategory::Sports,
        DisplayCategory::Exams,
        DisplayCategory::Events,
        DisplayCategory::Clubs,
        DisplayCategory::Placements,
        DisplayCategory::Celebrations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayCategory::Connections => "connections",
            DisplayCategory::Sports => "sports",
            DisplayCategory::Exams => "exams",
            DisplayCategory::Events => "events",
            DisplayCategory::Clubs => "clubs",
            DisplayCategory::Placements => "placements",
            DisplayCategory::Celebrations => "celebrations",
        }
    }

    /// 大小写不敏感地匹配后端的 category 字符串
    pub fn matching(category: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(category))
    }
}

impl fmt::Display for DisplayCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::matching(s).ok_or_else(|| format!("Unknown notification category: {}", s))
    }
}

/// 按分类分组后的 feed
#[derive(Debug, Clone, Serialize)]
pub struct CategorizedFeed {
    pub categories: Vec<CategoryBucket>,
    /// 不属于任何固定分类、因此不会在任何标签页中显示的通知数
    pub unlisted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBucket {
    pub category: DisplayCategory,
    pub notifications: Vec<Notification>,
}

impl CategorizedFeed {
    pub fn bucket(&self, category: DisplayCategory) -> &[Notification] {
        self.categories
            .iter()
            .find(|bucket| bucket.category == category)
            .map(|bucket| bucket.notifications.as_slice())
            .unwrap_or(&[])
    }
}
