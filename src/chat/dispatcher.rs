use std::sync::Arc;

use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::broker::{Broker, Event, GroupName};
use crate::chat::protocol::{InboundFrame, NotificationFrame, OutboundFrame};
use crate::db::{
    Message, MessageRepository, NewNotification, Notification, NotificationOutcome,
    NotificationRepository, NotificationType, ReadReceipt, RoomRepository, User,
};
use crate::error::AppError;

/// An authorized chat socket: who is on it and which room it is bound to.
#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: Uuid,
    pub user: User,
    pub room_id: i64,
}

/// Routes client frames to the stores and turns broker events into frames.
///
/// Shared by every socket and by the REST mark-read endpoint, so both paths
/// produce identical side effects.
#[derive(Clone)]
pub struct Dispatcher {
    db: Pool<Sqlite>,
    broker: Arc<dyn Broker>,
    preview_chars: usize,
}

impl Dispatcher {
    pub fn new(db: Pool<Sqlite>, broker: Arc<dyn Broker>, preview_chars: usize) -> Self {
        Self {
            db,
            broker,
            preview_chars,
        }
    }

    pub fn db(&self) -> &Pool<Sqlite> {
        &self.db
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Handles one text frame from a chat socket and returns the frames meant
    /// for that socket alone. Failures are logged and never reach the caller.
    pub async fn handle_text(&self, session: &Session, text: &str) -> Vec<OutboundFrame> {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    conn_id = %session.conn_id,
                    room_id = session.room_id,
                    user_id = session.user.id,
                    error = %e,
                    "malformed frame ignored"
                );
                return Vec::new();
            }
        };

        let kind = frame.kind();
        match self.handle_frame(session, frame).await {
            Ok(replies) => replies,
            Err(e) => {
                tracing::error!(
                    conn_id = %session.conn_id,
                    room_id = session.room_id,
                    user_id = session.user.id,
                    event = kind,
                    error = ?e,
                    "frame handling failed"
                );
                Vec::new()
            }
        }
    }

    pub async fn handle_frame(
        &self,
        session: &Session,
        frame: InboundFrame,
    ) -> Result<Vec<OutboundFrame>, AppError> {
        match frame {
            InboundFrame::SendMessage { message } => {
                let sent = self.send_message(&session.user, session.room_id, &message).await?;
                Ok(sent
                    .map(|message| OutboundFrame::MessageDelivered { message_id: message.id })
                    .into_iter()
                    .collect())
            }
            InboundFrame::MarkMessagesRead { room_id, message_ids } => {
                let room_id = room_id.unwrap_or(session.room_id);
                self.mark_messages_read(&session.user, room_id, &message_ids).await?;
                Ok(Vec::new())
            }
            InboundFrame::ReadMessages { chatroom } => {
                let room_id = chatroom.unwrap_or(session.room_id);
                self.mark_room_read(&session.user, room_id).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Persists and fans out a chat message.
    ///
    /// Returns `None` without side effects when the text is blank, the room no
    /// longer exists or the sender is no longer a participant.
    pub async fn send_message(
        &self,
        sender: &User,
        room_id: i64,
        text: &str,
    ) -> Result<Option<Message>, AppError> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(None);
        }

        if !RoomRepository::is_participant(&self.db, sender.id, room_id).await? {
            tracing::warn!(room_id, user_id = sender.id, "send from non-participant dropped");
            return Ok(None);
        }

        let saved = MessageRepository::save(&self.db, sender.id, room_id, content).await?;
        let Some(message) = saved else {
            tracing::debug!(room_id, user_id = sender.id, "room vanished, message dropped");
            return Ok(None);
        };

        // The author has always read their own message.
        MessageRepository::mark_read(&self.db, sender.id, &[message.id]).await?;

        let notified = self.notify_participants(&message, sender).await;

        let reached = self
            .broker
            .publish(
                &GroupName::room(room_id),
                Event::NewMessage {
                    room_id,
                    message_id: message.id,
                    author_id: sender.id,
                    author: sender.display_name().to_string(),
                    author_full_name: message.author_full_name.clone(),
                    content: message.content.clone(),
                    timestamp: message.created_at,
                },
            )
            .await;

        for notification in notified {
            let recipient = notification.recipient_id;
            self.broker
                .publish(&GroupName::user(recipient), Event::Notification { notification })
                .await;
        }

        tracing::info!(
            room_id,
            user_id = sender.id,
            message_id = message.id,
            reached,
            event = "new_message",
            "message sent"
        );

        Ok(Some(message))
    }

    /// Creates a message notification for every other participant whose
    /// settings allow it. A failure for one recipient does not stop the rest.
    async fn notify_participants(&self, message: &Message, author: &User) -> Vec<Notification> {
        let participants = match RoomRepository::participants(&self.db, message.room_id).await {
            Ok(participants) => participants,
            Err(e) => {
                tracing::error!(
                    room_id = message.room_id,
                    error = ?e,
                    "could not load participants"
                );
                return Vec::new();
            }
        };

        let mut created = Vec::new();
        for recipient in participants.into_iter().filter(|u| u.id != author.id) {
            let new = NewNotification {
                recipient_id: recipient.id,
                sender_id: Some(author.id),
                kind: NotificationType::Message,
                title: format!("New message from {}", author.display_name()),
                body: preview(&message.content, self.preview_chars),
                chat_room_id: Some(message.room_id),
                message_id: Some(message.id),
            };

            match NotificationRepository::create_if_enabled(&self.db, new).await {
                Ok(NotificationOutcome::Created(notification)) => created.push(notification),
                Ok(NotificationOutcome::Suppressed) => {
                    tracing::debug!(user_id = recipient.id, "message notifications disabled");
                }
                Err(e) => {
                    tracing::error!(user_id = recipient.id, error = ?e, "notification not created");
                }
            }
        }
        created
    }

    /// Marks specific messages of `room_id` read for `reader`. Ids from other
    /// rooms and the reader's own messages are ignored.
    pub async fn mark_messages_read(
        &self,
        reader: &User,
        room_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<ReadReceipt>, AppError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        if !RoomRepository::is_participant(&self.db, reader.id, room_id).await? {
            tracing::warn!(room_id, user_id = reader.id, "mark-read from non-participant dropped");
            return Ok(Vec::new());
        }

        let ids = MessageRepository::readable_ids(&self.db, room_id, reader.id, message_ids).await?;
        let receipts = MessageRepository::mark_read(&self.db, reader.id, &ids).await?;
        self.publish_receipts(reader, room_id, &receipts).await;
        Ok(receipts)
    }

    /// Marks everything unread in `room_id` read for `reader`.
    pub async fn mark_room_read(
        &self,
        reader: &User,
        room_id: i64,
    ) -> Result<Vec<ReadReceipt>, AppError> {
        if !RoomRepository::is_participant(&self.db, reader.id, room_id).await? {
            tracing::warn!(room_id, user_id = reader.id, "mark-read from non-participant dropped");
            return Ok(Vec::new());
        }

        let receipts =
            MessageRepository::mark_all_unread_in_room(&self.db, reader.id, room_id).await?;
        self.publish_receipts(reader, room_id, &receipts).await;
        Ok(receipts)
    }

    /// One `message_read` per new marker to the room, plus a single summary
    /// on the reader's own group. Nothing is published for existing markers.
    async fn publish_receipts(&self, reader: &User, room_id: i64, receipts: &[ReadReceipt]) {
        if receipts.is_empty() {
            return;
        }

        let room = GroupName::room(room_id);
        for receipt in receipts {
            self.broker
                .publish(
                    &room,
                    Event::MessageRead {
                        room_id,
                        message_id: receipt.message_id,
                        user_id: receipt.user_id,
                        read_at: receipt.read_at,
                    },
                )
                .await;
        }

        self.broker
            .publish(
                &GroupName::user(reader.id),
                Event::ReadReceipt {
                    room_id,
                    message_ids: receipts.iter().map(|r| r.message_id).collect(),
                },
            )
            .await;

        tracing::debug!(
            room_id,
            user_id = reader.id,
            count = receipts.len(),
            event = "message_read",
            "read receipts published"
        );
    }

    /// Formats a broker event for one chat socket. Unread counts are computed
    /// here, per recipient, rather than by the publisher.
    pub async fn render(
        &self,
        session: &Session,
        event: &Event,
    ) -> Result<Option<OutboundFrame>, AppError> {
        let frame = match event {
            Event::NewMessage {
                room_id,
                message_id,
                author_id,
                author,
                author_full_name,
                content,
                timestamp,
            } => {
                if *room_id != session.room_id {
                    return Ok(None);
                }
                let unread_count =
                    MessageRepository::unread_count(&self.db, *room_id, session.user.id).await?;
                OutboundFrame::NewMessage {
                    message: content.clone(),
                    author: author.clone(),
                    author_full_name: author_full_name.clone(),
                    author_id: *author_id,
                    message_id: *message_id,
                    timestamp: *timestamp,
                    unread_count,
                }
            }
            Event::MessageRead {
                room_id,
                message_id,
                user_id,
                read_at,
            } => {
                if *room_id != session.room_id {
                    return Ok(None);
                }
                OutboundFrame::MessageRead {
                    message_id: *message_id,
                    user_id: *user_id,
                    read_at: *read_at,
                }
            }
            other => return Ok(personal_frame(other)),
        };
        Ok(Some(frame))
    }

    /// Handles one text frame from a notification socket.
    pub async fn handle_notification_text(&self, user: &User, text: &str) -> Vec<OutboundFrame> {
        let frame = match serde_json::from_str::<NotificationFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    user_id = user.id,
                    error = %e,
                    "malformed notification frame ignored"
                );
                return Vec::new();
            }
        };

        match self.handle_notification_frame(user, frame).await {
            Ok(replies) => replies,
            Err(e) => {
                tracing::error!(user_id = user.id, error = ?e, "notification frame failed");
                Vec::new()
            }
        }
    }

    async fn handle_notification_frame(
        &self,
        user: &User,
        frame: NotificationFrame,
    ) -> Result<Vec<OutboundFrame>, AppError> {
        match frame {
            NotificationFrame::MarkRead { notification_id } => {
                if NotificationRepository::mark_read(&self.db, notification_id, user.id)
                    .await?
                    .is_some()
                {
                    let count = NotificationRepository::unread_count(&self.db, user.id).await?;
                    self.broker
                        .publish(&GroupName::user(user.id), Event::UnreadCount { count })
                        .await;
                }
                Ok(Vec::new())
            }
            NotificationFrame::GetUnreadCount => {
                let count = NotificationRepository::unread_count(&self.db, user.id).await?;
                Ok(vec![OutboundFrame::UnreadCount { count }])
            }
        }
    }
}

/// Frames for events published on a user's own group.
pub fn personal_frame(event: &Event) -> Option<OutboundFrame> {
    match event {
        Event::Notification { notification } => Some(OutboundFrame::Notification {
            notification: notification.clone(),
        }),
        Event::ReadReceipt { room_id, message_ids } => Some(OutboundFrame::ReadReceipt {
            message_ids: message_ids.clone(),
            room_id: *room_id,
        }),
        Event::UnreadCount { count } => Some(OutboundFrame::UnreadCount { count: *count }),
        Event::NewMessage { .. } | Event::MessageRead { .. } => None,
    }
}

/// Notification body: the first `max_chars` characters, with an ellipsis
/// when anything was cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn short_content_is_kept() {
        assert_eq!(preview("hello", 100), "hello");
        assert_eq!(preview(&"a".repeat(100), 100), "a".repeat(100));
    }

    #[test]
    fn long_content_is_cut_with_ellipsis() {
        assert_eq!(preview(&"a".repeat(101), 100), format!("{}...", "a".repeat(100)));
    }

    #[test]
    fn cuts_on_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll...");
    }
}
