//! 托管后端的协作接口。
//!
//! `Backend` 是普通会话能做的事情：按可见性读取通知和好友请求、条件写入请求状态、
//! 读取和打开会话、订阅表变更。`PrivilegedProcedures` 是单独的可信边界，只有它能
//! 物化双向的关注关系；`Backend` 上没有任何写 connections 的操作。

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;

use crate::{
    error::Result,
    models::{
        connection::{ConnectionRequest, RequestStatus, StatusUpdate},
        conversation::{ConversationRecord, MessageRecord},
        notification::NotificationRow,
        profile::ProfileSummary,
        realtime::{ChangeEvent, FeedTable},
    },
};

/// 某张表的变更事件流，丢弃即取消订阅
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// 用户搜索最多返回的条数
pub const USER_SEARCH_LIMIT: usize = 20;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// 当前用户可见的全部通知，sender 已联表
    async fn fetch_notifications(&self, viewer_id: &str) -> Result<Vec<NotificationRow>>;

    /// 发给 recipient 的 pending 好友请求，requester 已联表
    async fn fetch_pending_requests(&self, recipient_id: &str) -> Result<Vec<ConnectionRequest>>;

    async fn fetch_request(&self, request_id: &str) -> Result<Option<ConnectionRequest>>;

    /// 仅当请求仍为 pending 且发给 recipient 时写入新状态
    async fn update_request_status(
        &self,
        request_id: &str,
        recipient_id: &str,
        status: RequestStatus,
    ) -> Result<StatusUpdate>;

    /// participant 参与的全部会话
    async fn fetch_conversations(&self, participant_id: &str) -> Result<Vec<ConversationRecord>>;

    async fn fetch_messages(&self, conversation_ids: &[String]) -> Result<Vec<MessageRecord>>;

    async fn fetch_profiles(&self, ids: &[String]) -> Result<Vec<ProfileSummary>>;

    /// user 已建立关系的联系人
    async fn fetch_contacts(&self, user_id: &str) -> Result<Vec<ProfileSummary>>;

    /// 按姓名模糊搜索，结果不含 exclude_id
    async fn search_profiles(&self, query: &str, exclude_id: &str) -> Result<Vec<ProfileSummary>>;

    /// 取得两人之间的会话，不存在时创建；并发调用只会得到同一条记录
    async fn open_conversation(&self, user_id: &str, friend_id: &str) -> Result<ConversationRecord>;

    async fn watch(&self, table: FeedTable) -> Result<ChangeStream>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrivilegedProcedures: Send + Sync {
    /// 原子地建立 follower <-> following 的双向关系
    async fn create_connection(&self, follower_id: &str, following_id: &str) -> Result<()>;
}

/// 为一次后端调用加上超时，失败时返回可读的原因，由调用方决定错误分类
pub async fn bounded<T, F>(timeout: Duration, operation: &str, call: F) -> std::result::Result<T, String>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{} failed: {}", operation, e)),
        Err(_) => Err(format!("{} timed out after {}s", operation, timeout.as_secs_f32())),
    }
}
