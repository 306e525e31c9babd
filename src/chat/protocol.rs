//! JSON frames exchanged with WebSocket clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Notification;

/// Frames a chat socket accepts, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    SendMessage {
        message: String,
    },
    MarkMessagesRead {
        room_id: Option<i64>,
        message_ids: Vec<i64>,
    },
    /// Mark everything unread in `chatroom` (the socket's room when absent).
    ReadMessages {
        chatroom: Option<i64>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedFrame {
    SendMessage(SendMessageBody),
    MarkMessagesRead(MarkReadBody),
    MarkSpecificMessages(MarkReadBody),
    ReadMessages(ReadMessagesBody),
}

#[derive(Deserialize)]
struct SendMessageBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct MarkReadBody {
    #[serde(default)]
    room_id: Option<i64>,
    #[serde(default)]
    message_ids: Vec<i64>,
}

#[derive(Deserialize)]
struct ReadMessagesBody {
    #[serde(default)]
    chatroom: Option<i64>,
}

const KNOWN_TYPES: [&str; 4] = [
    "send_message",
    "mark_messages_read",
    "mark_specific_messages",
    "read_messages",
];

impl InboundFrame {
    /// Frames whose `type` is missing or unknown are read as `send_message`,
    /// which is what older clients send.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| KNOWN_TYPES.contains(&kind));

        if !known {
            let body: SendMessageBody = serde_json::from_value(value)?;
            return Ok(InboundFrame::SendMessage {
                message: body.message.unwrap_or_default(),
            });
        }

        Ok(match serde_json::from_value::<TaggedFrame>(value)? {
            TaggedFrame::SendMessage(body) => InboundFrame::SendMessage {
                message: body.message.unwrap_or_default(),
            },
            TaggedFrame::MarkMessagesRead(body) | TaggedFrame::MarkSpecificMessages(body) => {
                InboundFrame::MarkMessagesRead {
                    room_id: body.room_id,
                    message_ids: body.message_ids,
                }
            }
            TaggedFrame::ReadMessages(body) => InboundFrame::ReadMessages {
                chatroom: body.chatroom,
            },
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::SendMessage { .. } => "send_message",
            InboundFrame::MarkMessagesRead { .. } => "mark_messages_read",
            InboundFrame::ReadMessages { .. } => "read_messages",
        }
    }
}

/// Frames a notification socket accepts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationFrame {
    MarkRead { notification_id: i64 },
    GetUnreadCount,
}

/// Frames written to sockets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    NewMessage {
        message: String,
        author: String,
        author_full_name: String,
        author_id: i64,
        message_id: i64,
        timestamp: DateTime<Utc>,
        unread_count: i64,
    },
    MessageDelivered {
        message_id: i64,
    },
    MessageRead {
        message_id: i64,
        user_id: i64,
        read_at: DateTime<Utc>,
    },
    /// Cross-device receipt: the reader's own messages list changed.
    #[serde(rename = "message_read")]
    ReadReceipt {
        message_ids: Vec<i64>,
        room_id: i64,
    },
    Notification {
        notification: Notification,
    },
    UnreadCount {
        count: i64,
    },
}

impl OutboundFrame {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
