//! Named-group publish/subscribe used to fan chat and notification events
//! out to every socket, whichever connection produced them.
//!
//! Two kinds of groups exist: one per room (`chat_<room_id>`) shared by all
//! sockets open on that room, and one per user (`notifications_<user_id>`)
//! shared by all of that user's sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::Notification;
use crate::error::AppError;

mod remote;

pub use remote::RedisBroker;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupName(String);

impl GroupName {
    pub fn room(room_id: i64) -> Self {
        Self(format!("chat_{}", room_id))
    }

    pub fn user(user_id: i64) -> Self {
        Self(format!("notifications_{}", user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recognizes the two group shapes; anything else is not a group.
    pub fn parse(name: &str) -> Option<Self> {
        let id = name
            .strip_prefix("chat_")
            .or_else(|| name.strip_prefix("notifications_"))?;
        id.parse::<i64>().ok()?;
        Some(Self(name.to_string()))
    }
}

impl std::fmt::Display for GroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events travelling through the broker. They are serializable so that a
/// broker backed by an external server can carry them unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    NewMessage {
        room_id: i64,
        message_id: i64,
        author_id: i64,
        author: String,
        author_full_name: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    MessageRead {
        room_id: i64,
        message_id: i64,
        user_id: i64,
        read_at: DateTime<Utc>,
    },
    /// Pushed on a user's own group only.
    Notification { notification: Notification },
    /// Pushed on the reader's own group so their other devices clear badges.
    ReadReceipt { room_id: i64, message_ids: Vec<i64> },
    UnreadCount { count: i64 },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::NewMessage { .. } => "new_message",
            Event::MessageRead { .. } => "message_read",
            Event::Notification { .. } => "notification",
            Event::ReadReceipt { .. } => "read_receipt",
            Event::UnreadCount { .. } => "unread_count",
        }
    }
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A live membership in one group. Dropping it leaves the group.
pub struct Subscription {
    group: GroupName,
    receiver: Option<broadcast::Receiver<Arc<Event>>>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(
        group: GroupName,
        receiver: broadcast::Receiver<Arc<Event>>,
        release: Option<Release>,
    ) -> Self {
        Self {
            group,
            receiver: Some(receiver),
            release,
        }
    }

    /// Next event for this member, or `None` once the broker has shut down.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        group = %self.group,
                        skipped,
                        "subscriber lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver goes first so the release sees the remaining members only.
        drop(self.receiver.take());
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Publish/subscribe capability shared by every connection.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Delivers `event` to the current members of `group`; returns how many
    /// members it reached.
    async fn publish(&self, group: &GroupName, event: Event) -> usize;

    async fn subscribe(&self, group: &GroupName) -> Result<Subscription, AppError>;

    fn subscriber_count(&self, group: &GroupName) -> usize;

    /// Closes every group. Members observe the end of their subscription.
    async fn shutdown(&self);
}

/// In-process broker: one broadcast channel per group, created on first
/// subscription and dropped once it has no members.
pub struct LocalBroker {
    groups: Arc<DashMap<String, broadcast::Sender<Arc<Event>>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, group: &GroupName, event: Event) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }

        let Some(sender) = self
            .groups
            .get(group.as_str())
            .map(|entry| entry.value().clone())
        else {
            return 0;
        };

        match sender.send(Arc::new(event)) {
            Ok(reached) => reached,
            Err(_) => {
                self.groups
                    .remove_if(group.as_str(), |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }

    async fn subscribe(&self, group: &GroupName) -> Result<Subscription, AppError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::Internal("broker is shut down".to_string()));
        }

        let receiver = self
            .groups
            .entry(group.as_str().to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let groups = Arc::clone(&self.groups);
        let name = group.as_str().to_string();
        let release: Release = Box::new(move || {
            groups.remove_if(&name, |_, tx| tx.receiver_count() == 0);
        });

        Ok(Subscription::new(group.clone(), receiver, Some(release)))
    }

    fn subscriber_count(&self, group: &GroupName) -> usize {
        self.groups
            .get(group.as_str())
            .map(|entry| entry.value().receiver_count())
            .unwrap_or(0)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.groups.clear();
        tracing::info!("broker shut down, all groups closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unread(count: i64) -> Event {
        Event::UnreadCount { count }
    }

    #[tokio::test]
    async fn publish_reaches_every_member() {
        let broker = LocalBroker::new(16);
        let group = GroupName::room(1);
        let mut a = broker.subscribe(&group).await.unwrap();
        let mut b = broker.subscribe(&group).await.unwrap();

        assert_eq!(broker.publish(&group, unread(3)).await, 2);
        for sub in [&mut a, &mut b] {
            assert!(matches!(*sub.recv().await.unwrap(), Event::UnreadCount { count: 3 }));
        }
    }

    #[tokio::test]
    async fn groups_are_isolated() {
        let broker = LocalBroker::new(16);
        let _room_one = broker.subscribe(&GroupName::room(1)).await.unwrap();

        assert_eq!(broker.publish(&GroupName::room(2), unread(1)).await, 0);
        assert_eq!(broker.publish(&GroupName::user(1), unread(1)).await, 0);
    }

    #[tokio::test]
    async fn dropping_last_member_removes_group() {
        let broker = LocalBroker::new(16);
        let group = GroupName::user(9);
        let first = broker.subscribe(&group).await.unwrap();
        let second = broker.subscribe(&group).await.unwrap();
        assert_eq!(broker.subscriber_count(&group), 2);

        drop(first);
        assert_eq!(broker.subscriber_count(&group), 1);
        drop(second);
        assert_eq!(broker.subscriber_count(&group), 0);
        assert_eq!(broker.group_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_leaves_remove_the_group() {
        for round in 0..50 {
            let broker = Arc::new(LocalBroker::new(16));
            let group = GroupName::room(round);
            let first = broker.subscribe(&group).await.unwrap();
            let second = broker.subscribe(&group).await.unwrap();

            let barrier = Arc::new(std::sync::Barrier::new(2));
            let leaves: Vec<_> = [first, second]
                .into_iter()
                .map(|sub| {
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        drop(sub);
                    })
                })
                .collect();
            for leave in leaves {
                leave.join().unwrap();
            }

            assert_eq!(broker.subscriber_count(&group), 0);
            assert_eq!(broker.group_count(), 0, "round {round} left a group behind");
        }
    }

    #[test]
    fn group_names_parse_back() {
        assert_eq!(GroupName::parse("chat_12"), Some(GroupName::room(12)));
        assert_eq!(GroupName::parse("notifications_3"), Some(GroupName::user(3)));
        assert_eq!(GroupName::parse("chat_"), None);
        assert_eq!(GroupName::parse("lobby_1"), None);
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let broker = LocalBroker::new(16);
        let mut sub = broker.subscribe(&GroupName::room(5)).await.unwrap();

        broker.shutdown().await;

        assert!(sub.recv().await.is_none());
        assert!(broker.subscribe(&GroupName::room(5)).await.is_err());
    }

    #[tokio::test]
    async fn lagging_member_skips_ahead() {
        let broker = LocalBroker::new(2);
        let group = GroupName::room(3);
        let mut sub = broker.subscribe(&group).await.unwrap();

        for count in 0..5 {
            broker.publish(&group, unread(count)).await;
        }

        assert!(matches!(*sub.recv().await.unwrap(), Event::UnreadCount { count: 3 }));
    }
}
