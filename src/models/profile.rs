use serde::{Deserialize, Serialize};

use crate::utils::serde_helpers::record_id;

/// 通知与好友请求中联表带出的用户展示信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    #[serde(with = "record_id")]
    pub id: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileSummary {
    pub fn new(id: impl Into<String>, full_name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.map(str::to_string),
            avatar_url: None,
        }
    }

    /// 非空的显示名称
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
