pub mod connection;
pub mod conversation;
pub mod notification;
pub mod profile;
pub mod realtime;
