use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        connection::{ConnectionRequest, RequestStatus},
        notification::{CategorizedFeed, CategoryBucket, DisplayCategory, Notification, NotificationRow},
    },
    services::backend::{bounded, Backend},
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 通知聚合服务：拉取两类数据并合并为按时间倒序的 feed
#[derive(Clone)]
pub struct NotificationService {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl NotificationService {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            timeout: config.backend_timeout(),
        }
    }

    /// 重新拉取完整 feed。只读，可重复、并发调用
    pub async fn refresh(&self, user_id: &str) -> Result<Vec<Notification>> {
        debug!("Refreshing notification feed for user: {}", user_id);

        let rows = bounded(
            self.timeout,
            "Notification fetch",
            self.backend.fetch_notifications(user_id),
        )
        .await
        .map_err(AppError::Fetch)?;

        let requests = bounded(
            self.timeout,
            "Connection request fetch",
            self.backend.fetch_pending_requests(user_id),
        )
        .await
        .map_err(AppError::Fetch)?;

        let feed = merge_feed(rows, requests);
        debug!("Feed for user {} has {} entries", user_id, feed.len());
        Ok(feed)
    }

    pub async fn categorized(&self, user_id: &str) -> Result<CategorizedFeed> {
        let feed = self.refresh(user_id).await?;
        Ok(categorize(&feed))
    }

    pub async fn by_category(&self, user_id: &str, category: DisplayCategory) -> Result<Vec<Notification>> {
        let feed = self.refresh(user_id).await?;
        Ok(notifications_by_category(&feed, category.as_str())
            .into_iter()
            .cloned()
            .collect())
    }
}

/// 合并直接通知与 pending 好友请求，按 created_at 倒序（稳定排序）
pub fn merge_feed(rows: Vec<NotificationRow>, requests: Vec<ConnectionRequest>) -> Vec<Notification> {
    let mut feed: Vec<Notification> = rows.into_iter().map(Notification::from).collect();

    let mut seen = HashSet::new();
    feed.extend(
        requests
            .into_iter()
            .filter(|request| request.status == RequestStatus::Pending)
            .filter(|request| seen.insert(request.id.clone()))
            .map(Notification::from_connection_request),
    );

    feed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    feed
}

/// 按分类过滤（大小写不敏感）
pub fn notifications_by_category<'a>(feed: &'a [Notification], category: &str) -> Vec<&'a Notification> {
    feed.iter()
        .filter(|notification| notification.in_category(category))
        .collect()
}

/// 按固定标签页分组；不在固定分类中的通知不会出现在任何分组里，只计数
pub fn categorize(feed: &[Notification]) -> CategorizedFeed {
    let categories = DisplayCategory::ALL
        .into_iter()
        .map(|category| CategoryBucket {
            category,
            notifications: notifications_by_category(feed, category.as_str())
                .into_iter()
                .cloned()
                .collect(),
        })
        .collect();

    let unlisted = feed
        .iter()
        .filter(|notification| DisplayCategory::matching(&notification.category).is_none())
        .count();
    if unlisted > 0 {
        debug!("{} notifications have no display category", unlisted);
    }

    CategorizedFeed { categories, unlisted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::ProfileSummary;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn row(id: &str, category: &str, created_at: DateTime<Utc>) -> NotificationRow {
        NotificationRow {
            id: id.to_string(),
            recipient_id: None,
            title: format!("{} update", category),
            content: "Details inside".to_string(),
            category: category.to_string(),
            created_at,
            sender_id: None,
            sender: None,
        }
    }

    fn pending(id: &str, created_at: DateTime<Utc>) -> ConnectionRequest {
        ConnectionRequest {
            id: id.to_string(),
            requester_id: "user_r".to_string(),
            recipient_id: "user_u".to_string(),
            status: RequestStatus::Pending,
            created_at,
            requester: Some(ProfileSummary::new("user_r", Some("Rahul"))),
        }
    }

    #[test]
    fn test_merge_orders_most_recent_first() {
        let t1 = at(0);
        let t2 = t1 + ChronoDuration::minutes(10);
        let feed = merge_feed(vec![row("n1", "sports", t2)], vec![pending("r1", t1)]);

        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].id, "n1");
        assert_eq!(feed[0].category, "sports");
        assert_eq!(feed[1].id, "connection-r1");
        assert_eq!(feed[1].request_id(), Some("r1"));
    }

    #[test]
    fn test_merge_skips_duplicate_and_resolved_requests() {
        let mut accepted = pending("r2", at(5));
        accepted.status = RequestStatus::Accepted;
        let feed = merge_feed(Vec::new(), vec![pending("r1", at(1)), pending("r1", at(1)), accepted]);

        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].request_id(), Some("r1"));
    }

    #[test]
    fn test_merge_keeps_input_order_for_ties() {
        let feed = merge_feed(
            vec![row("a", "clubs", at(3)), row("b", "events", at(3))],
            vec![pending("r1", at(3))],
        );
        let ids: Vec<&str> = feed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "connection-r1"]);
    }

    #[test]
    fn test_by_category_is_case_insensitive() {
        let feed = merge_feed(
            vec![row("n1", "Sports", at(2)), row("n2", "exams", at(1))],
            Vec::new(),
        );
        let sports = notifications_by_category(&feed, "SPORTS");
        assert_eq!(sports.len(), 1);
        assert_eq!(sports[0].id, "n1");
    }

    #[test]
    fn test_categorize_drops_unknown_categories() {
        let feed = merge_feed(
            vec![
                row("n1", "sports", at(3)),
                row("n2", "hostel", at(2)),
                row("n3", "Placements", at(1)),
            ],
            vec![pending("r1", at(0))],
        );
        let grouped = categorize(&feed);

        assert_eq!(grouped.categories.len(), 7);
        assert_eq!(grouped.categories[0].category, DisplayCategory::Connections);
        assert_eq!(grouped.bucket(DisplayCategory::Connections).len(), 1);
        assert_eq!(grouped.bucket(DisplayCategory::Sports).len(), 1);
        assert_eq!(grouped.bucket(DisplayCategory::Placements).len(), 1);
        assert!(grouped.bucket(DisplayCategory::Clubs).is_empty());
        assert_eq!(grouped.unlisted, 1);

        let shown: usize = grouped.categories.iter().map(|b| b.notifications.len()).sum();
        assert_eq!(shown, feed.len() - 1);
    }

    fn category_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "connections", "Sports", "EXAMS", "events", "clubs", "placements", "celebrations", "misc", "",
        ])
        .prop_map(str::to_string)
    }

    proptest! {
        #[test]
        fn prop_feed_is_sorted_and_contains_one_entry_per_pending_request(
            notifications in prop::collection::vec((category_strategy(), 0i64..10_000), 0..20),
            requests in prop::collection::vec(0i64..10_000, 0..10),
        ) {
            let rows: Vec<NotificationRow> = notifications
                .iter()
                .enumerate()
                .map(|(i, (category, offset))| row(&format!("n{}", i), category, at(*offset)))
                .collect();
            let pending_requests: Vec<ConnectionRequest> = requests
                .iter()
                .enumerate()
                .map(|(i, offset)| pending(&format!("r{}", i), at(*offset)))
                .collect();

            let feed = merge_feed(rows, pending_requests);

            prop_assert_eq!(feed.len(), notifications.len() + requests.len());
            prop_assert!(feed.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at));
            for i in 0..requests.len() {
                let request_id = format!("r{}", i);
                let matches = feed
                    .iter()
                    .filter(|n| n.request_id() == Some(request_id.as_str()) && n.category == "connections")
                    .count();
                prop_assert_eq!(matches, 1);
            }
        }

        #[test]
        fn prop_buckets_only_hold_matching_categories(
            notifications in prop::collection::vec((category_strategy(), 0i64..1_000), 0..30),
        ) {
            let rows: Vec<NotificationRow> = notifications
                .iter()
                .enumerate()
                .map(|(i, (category, offset))| row(&format!("n{}", i), category, at(*offset)))
                .collect();
            let feed = merge_feed(rows, Vec::new());
            let grouped = categorize(&feed);

            let mut shown = 0;
            for bucket in &grouped.categories {
                for notification in &bucket.notifications {
                    prop_assert_eq!(
                        notification.category.to_lowercase(),
                        bucket.category.as_str().to_lowercase()
                    );
                }
                shown += bucket.notifications.len();
            }
            prop_assert_eq!(shown + grouped.unlisted, feed.len());
        }
    }

    #[tokio::test]
    async fn test_refresh_reports_notification_fetch_failure() {
        let mut backend = crate::services::backend::MockBackend::new();
        backend
            .expect_fetch_notifications()
            .times(1)
            .returning(|_| Err(AppError::internal("connection reset")));
        backend.expect_fetch_pending_requests().times(0);
        let service = NotificationService::new(Arc::new(backend), &Config::default());

        match service.refresh("uma").await {
            Err(AppError::Fetch(message)) => assert!(message.contains("Notification fetch failed")),
            other => panic!("expected fetch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_reports_request_fetch_failure() {
        let mut backend = crate::services::backend::MockBackend::new();
        backend
            .expect_fetch_notifications()
            .returning(|_| Ok(vec![row("n1", "sports", at(0))]));
        backend
            .expect_fetch_pending_requests()
            .returning(|_| Err(AppError::internal("permission denied")));
        let service = NotificationService::new(Arc::new(backend), &Config::default());

        assert!(matches!(service.categorized("uma").await, Err(AppError::Fetch(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out_as_fetch_error() {
        let backend = Arc::new(crate::services::memory::MemoryBackend::new());
        backend.set_latency(Duration::from_secs(60));
        let config = Config {
            backend_timeout_secs: 1,
            ..Config::default()
        };
        let service = NotificationService::new(backend, &config);

        match service.refresh("uma").await {
            Err(AppError::Fetch(message)) => assert!(message.contains("timed out after 1s")),
            other => panic!("expected fetch timeout, got {:?}", other),
        }
    }
}
