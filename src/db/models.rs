use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    OneToOne,
    Community,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub name: Option<String>,
    pub kind: RoomKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room_id: i64,
    pub author_id: i64,
    pub author_username: String, // Joined from users table
    pub author_full_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A newly created (message, reader) marker.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: i64,
    pub user_id: i64,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Message,
    ConnectionRequest,
    ConnectionAccepted,
    ConnectionRejected,
    System,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub sender_id: Option<i64>,
    pub sender_full_name: Option<String>, // Joined from users table
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    pub chat_room_id: Option<i64>,
    pub message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: i64,
    pub message_notifications: bool,
    pub connection_notifications: bool,
    pub system_notifications: bool,
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationSettings {
    /// Whether a notification of this category may be produced at all.
    pub fn allows(&self, kind: NotificationType) -> bool {
        match kind {
            NotificationType::Message => self.message_notifications,
            NotificationType::ConnectionRequest
            | NotificationType::ConnectionAccepted
            | NotificationType::ConnectionRejected => self.connection_notifications,
            NotificationType::System => self.system_notifications,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: i64,
    pub unread: i64,
    pub message: i64,
    pub connection: i64,
    pub system: i64,
}
