pub mod auth;
pub mod backend;
pub mod connection;
pub mod conversation;
pub mod database;
pub mod memory;
pub mod notification;
pub mod realtime;
pub mod websocket;

// 重新导出常用类型
pub use auth::AuthService;
pub use backend::{Backend, PrivilegedProcedures};
pub use connection::ConnectionService;
pub use conversation::ConversationService;
pub use database::{Database, PrivilegedGateway};
pub use memory::MemoryBackend;
pub use notification::NotificationService;
pub use realtime::{FeedSubscription, RealtimeService};
pub use websocket::WebSocketService;
