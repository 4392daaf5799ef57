use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

use crate::{
    models::{notification::Notification, profile::ProfileSummary},
    utils::serde_helpers::record_id,
};

/// 好友请求状态：pending 只能迁移一次到终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Accepted)
                | (RequestStatus::Pending, RequestStatus::Rejected)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    #[serde(with = "record_id")]
    pub id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub requester: Option<ProfileSummary>,
}

/// 已建立的关注关系，create_connection 会同时写入两个方向
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub follower_id: String,
    pub following_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveAction {
    Accept,
    Reject,
}

impl ResolveAction {
    pub fn from_accept(accept: bool) -> Self {
        if accept {
            ResolveAction::Accept
        } else {
            ResolveAction::Reject
        }
    }

    pub fn target_status(&self) -> RequestStatus {
        match self {
            ResolveAction::Accept => RequestStatus::Accepted,
            ResolveAction::Reject => RequestStatus::Rejected,
        }
    }
}

/// 条件状态写入的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied,
    /// 请求已不在 pending 状态，携带当前状态
    AlreadyResolved(RequestStatus),
    /// 请求不存在，或不是发给当前用户的
    NotFound,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequestBody {
    pub accept: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub request_id: String,
    pub status: RequestStatus,
    pub connection_created: bool,
    /// 处理后重新拉取的通知 feed；刷新失败时为空，客户端会随实时推送再次获取
    pub notifications: Option<Vec<Notification>>,
}
