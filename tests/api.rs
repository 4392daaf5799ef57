use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use campus_connect::{
    config::Config,
    models::{
        connection::{ConnectionRequest, RequestStatus},
        conversation::MessageRecord,
        notification::NotificationRow,
        profile::ProfileSummary,
    },
    routes,
    services::{AuthService, Backend, MemoryBackend, PrivilegedProcedures},
    state::AppState,
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    backend: Arc<MemoryBackend>,
    auth: AuthService,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::default();
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend);

        let shared: Arc<dyn Backend> = backend.clone();
        let privileged: Arc<dyn PrivilegedProcedures> = backend.clone();
        let state = Arc::new(AppState::new(config.clone(), shared, privileged));

        Self {
            app: routes::app(state),
            backend,
            auth: AuthService::new(&config),
        }
    }

    fn token(&self, user_id: &str) -> String {
        self.auth.issue_token(user_id, Duration::minutes(10)).unwrap()
    }

    async fn send(&self, method: Method, uri: &str, user_id: Option<&str>, body: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

fn seed(backend: &MemoryBackend) {
    backend.insert_profile(ProfileSummary::new("rohan", Some("Rohan Mehta")));
    backend.insert_profile(ProfileSummary::new("uma", Some("Uma Iyer")));

    backend.insert_notification(NotificationRow {
        id: "n1".to_string(),
        recipient_id: Some("uma".to_string()),
        title: "Finals".to_string(),
        content: "Cricket finals at 4pm".to_string(),
        category: "Sports".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
        sender_id: None,
        sender: None,
    });
    backend.insert_notification(NotificationRow {
        id: "n2".to_string(),
        recipient_id: None,
        title: "Timetable".to_string(),
        content: "Mid-term timetable published".to_string(),
        category: "exams".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 2, 28, 9, 0, 0).unwrap(),
        sender_id: None,
        sender: None,
    });
    backend.insert_connection_request(ConnectionRequest {
        id: "r1".to_string(),
        requester_id: "rohan".to_string(),
        recipient_id: "uma".to_string(),
        status: RequestStatus::Pending,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        requester: None,
    });
}

fn ids(feed: &Value) -> Vec<String> {
    feed.as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_feed_merges_requests_newest_first() {
    let app = TestApp::new();

    let (status, body) = app.send(Method::GET, "/api/notifications", Some("uma"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["data"]), vec!["n1", "connection-r1", "n2"]);

    let synthetic = &body["data"][1];
    assert_eq!(synthetic["title"], "Connection Request");
    assert_eq!(synthetic["content"], "Rohan Mehta wants to connect with you");
    assert_eq!(synthetic["category"], "connections");
    assert_eq!(synthetic["source"], "connection_request");
    assert_eq!(synthetic["request_id"], "r1");
}

#[tokio::test]
async fn test_other_user_sees_only_broadcasts() {
    let app = TestApp::new();

    let (status, body) = app.send(Method::GET, "/api/notifications", Some("rohan"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["data"]), vec!["n2"]);
}

#[tokio::test]
async fn test_categories_and_single_category() {
    let app = TestApp::new();

    let (status, body) = app
        .send(Method::GET, "/api/notifications/categories", Some("uma"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let buckets = body["data"]["categories"].as_array().unwrap();
    assert_eq!(buckets.len(), 7);
    assert_eq!(buckets[0]["category"], "connections");
    assert_eq!(ids(&buckets[0]["notifications"]), vec!["connection-r1"]);
    assert_eq!(ids(&buckets[1]["notifications"]), vec!["n1"]);
    assert_eq!(body["data"]["unlisted"], 0);

    let (status, body) = app
        .send(Method::GET, "/api/notifications/category/EXAMS", Some("uma"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["category"], "exams");
    assert_eq!(ids(&body["data"]["notifications"]), vec!["n2"]);
}

#[tokio::test]
async fn test_unknown_category_is_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .send(Method::GET, "/api/notifications/category/gossip", Some("uma"), None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, _) = app.send(Method::GET, "/api/notifications", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::POST, "/api/connections/requests/r1/accept", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.backend.request_status("r1"), Some(RequestStatus::Pending));
}

#[tokio::test]
async fn test_accept_creates_connection_and_refreshes_feed() {
    let app = TestApp::new();

    let (status, body) = app
        .send(Method::POST, "/api/connections/requests/r1/accept", Some("uma"), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "accepted");
    assert_eq!(body["data"]["connection_created"], true);
    assert_eq!(ids(&body["data"]["notifications"]), vec!["n1", "n2"]);

    assert_eq!(app.backend.request_status("r1"), Some(RequestStatus::Accepted));
    let connections = app.backend.connections();
    assert_eq!(connections.len(), 2);
    assert!(connections
        .iter()
        .any(|c| c.follower_id == "uma" && c.following_id == "rohan"));
}

#[tokio::test]
async fn test_resolve_with_body_rejects_without_connection() {
    let app = TestApp::new();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/connections/requests/r1/resolve",
            Some("uma"),
            Some(r#"{"accept":false}"#),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["connection_created"], false);
    assert_eq!(app.backend.request_status("r1"), Some(RequestStatus::Rejected));
    assert!(app.backend.connections().is_empty());
}

#[tokio::test]
async fn test_second_resolution_conflicts() {
    let app = TestApp::new();

    let (status, _) = app
        .send(Method::POST, "/api/connections/requests/r1/reject", Some("uma"), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(Method::POST, "/api/connections/requests/r1/accept", Some("uma"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
    assert_eq!(app.backend.request_status("r1"), Some(RequestStatus::Rejected));
    assert!(app.backend.connections().is_empty());
}

#[tokio::test]
async fn test_requester_cannot_resolve_own_request() {
    let app = TestApp::new();

    let (status, _) = app
        .send(Method::POST, "/api/connections/requests/r1/accept", Some("rohan"), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.backend.request_status("r1"), Some(RequestStatus::Pending));
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "campus-connect");
}

#[tokio::test]
async fn test_accepted_connection_becomes_contact_and_conversation() {
    let app = TestApp::new();

    let (status, _) = app
        .send(Method::POST, "/api/connections/requests/r1/accept", Some("uma"), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(Method::GET, "/api/conversations/contacts", Some("uma"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], "rohan");
    assert_eq!(body["data"][0]["full_name"], "Rohan Mehta");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/conversations",
            Some("uma"),
            Some(r#"{"friend_id":"rohan"}"#),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let conversation_id = body["data"]["conversation_id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["conversations"][0]["id"], conversation_id.as_str());

    app.backend.insert_message(MessageRecord {
        id: "m1".to_string(),
        conversation_id: conversation_id.clone(),
        sender_id: "rohan".to_string(),
        content: "Coffee after the seminar?".to_string(),
        created_at: Utc::now(),
        read_at: None,
    });

    let (status, body) = app.send(Method::GET, "/api/conversations", Some("uma"), None).await;
    assert_eq!(status, StatusCode::OK);
    let conversation = &body["data"][0];
    assert_eq!(conversation["unread_count"], 1);
    assert_eq!(conversation["last_message"]["content"], "Coffee after the seminar?");
    assert_eq!(conversation["participants"][0]["id"], "rohan");

    let (_, body) = app.send(Method::GET, "/api/conversations", Some("rohan"), None).await;
    assert_eq!(body["data"][0]["unread_count"], 0);
}

#[tokio::test]
async fn test_conversation_with_self_is_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .send(Method::POST, "/api/conversations", Some("uma"), Some(r#"{"friend_id":"uma"}"#))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_user_search_excludes_caller() {
    let app = TestApp::new();

    let (status, body) = app
        .send(Method::GET, "/api/conversations/users/search?q=MEH", Some("uma"), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    let found: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|profile| profile["id"].as_str().unwrap())
        .collect();
    assert_eq!(found, vec!["rohan"]);
}
