//! Redis-backed broker for running more than one server process.
//!
//! Every process keeps its sockets in a [`LocalBroker`]. Publishing goes out
//! as JSON on the Redis channel `support_chat:<group>`, and one pattern
//! subscription per process relays whatever arrives into the local groups.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use tokio::task::JoinHandle;

use super::{Broker, Event, GroupName, LocalBroker, Subscription};
use crate::error::AppError;

const CHANNEL_PREFIX: &str = "support_chat:";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct RedisBroker {
    local: Arc<LocalBroker>,
    connection: ConnectionManager,
    listener: JoinHandle<()>,
}

impl RedisBroker {
    /// Connects both the publishing connection and the relay subscription
    /// before returning, so a bad `REDIS_URL` fails startup.
    pub async fn connect(redis_url: &str, capacity: usize) -> Result<Self, AppError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        let pubsub = subscribe_all(&client).await?;

        let local = Arc::new(LocalBroker::new(capacity));
        let listener = tokio::spawn(run_relay(client, pubsub, local.clone()));

        Ok(Self {
            local,
            connection,
            listener,
        })
    }
}

fn channel_for(group: &GroupName) -> String {
    format!("{CHANNEL_PREFIX}{group}")
}

async fn subscribe_all(client: &Client) -> Result<PubSub, redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(format!("{CHANNEL_PREFIX}*")).await?;
    Ok(pubsub)
}

/// Hands one Redis message to the local members of its group.
async fn relay(local: &LocalBroker, channel: &str, payload: &str) -> usize {
    let Some(group) = channel
        .strip_prefix(CHANNEL_PREFIX)
        .and_then(GroupName::parse)
    else {
        tracing::warn!(channel, "message on an unknown channel ignored");
        return 0;
    };

    match serde_json::from_str::<Event>(payload) {
        Ok(event) => local.publish(&group, event).await,
        Err(e) => {
            tracing::warn!(%group, error = %e, "undecodable event ignored");
            0
        }
    }
}

async fn run_relay(client: Client, mut pubsub: PubSub, local: Arc<LocalBroker>) {
    loop {
        let mut messages = pubsub.into_on_message();
        while let Some(msg) = messages.next().await {
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    relay(&local, msg.get_channel_name(), &payload).await;
                }
                Err(e) => tracing::warn!(error = %e, "non-text payload ignored"),
            }
        }
        drop(messages);

        if local.is_closed() {
            return;
        }
        tracing::warn!("redis subscription lost, reconnecting");

        pubsub = loop {
            tokio::time::sleep(RECONNECT_DELAY).await;
            match subscribe_all(&client).await {
                Ok(pubsub) => break pubsub,
                Err(e) => tracing::warn!(error = %e, "redis reconnect failed"),
            }
        };
        tracing::info!("redis subscription restored");
    }
}

#[async_trait]
impl Broker for RedisBroker {
    /// Returns the number of server processes the event reached, since
    /// sockets on other processes are not visible from here.
    async fn publish(&self, group: &GroupName, event: Event) -> usize {
        if self.local.is_closed() {
            return 0;
        }

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%group, error = %e, "event could not be encoded");
                return 0;
            }
        };

        let mut connection = self.connection.clone();
        match connection
            .publish::<_, _, usize>(channel_for(group), payload)
            .await
        {
            Ok(reached) => reached,
            Err(e) => {
                tracing::error!(%group, error = %e, "redis publish failed");
                0
            }
        }
    }

    async fn subscribe(&self, group: &GroupName) -> Result<Subscription, AppError> {
        self.local.subscribe(group).await
    }

    fn subscriber_count(&self, group: &GroupName) -> usize {
        self.local.subscriber_count(group)
    }

    async fn shutdown(&self) {
        self.listener.abort();
        self.local.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_carry_the_group_name() {
        assert_eq!(channel_for(&GroupName::room(7)), "support_chat:chat_7");
        assert_eq!(
            channel_for(&GroupName::user(2)),
            "support_chat:notifications_2"
        );
    }

    #[tokio::test]
    async fn relayed_events_reach_local_members() {
        let local = LocalBroker::new(8);
        let mut sub = local.subscribe(&GroupName::room(4)).await.unwrap();
        let payload = serde_json::to_string(&Event::UnreadCount { count: 6 }).unwrap();

        assert_eq!(relay(&local, "support_chat:chat_4", &payload).await, 1);
        assert!(matches!(*sub.recv().await.unwrap(), Event::UnreadCount { count: 6 }));

        assert_eq!(relay(&local, "support_chat:chat_5", &payload).await, 0);
        assert_eq!(relay(&local, "other:chat_4", &payload).await, 0);
        assert_eq!(relay(&local, "support_chat:chat_4", "{not json").await, 0);
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL"]
    async fn events_cross_processes() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let sender = RedisBroker::connect(&url, 8).await.unwrap();
        let receiver = RedisBroker::connect(&url, 8).await.unwrap();
        let group = GroupName::user(41);
        let mut sub = receiver.subscribe(&group).await.unwrap();

        assert!(sender.publish(&group, Event::UnreadCount { count: 2 }).await >= 2);
        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(*event, Event::UnreadCount { count: 2 }));

        sender.shutdown().await;
        receiver.shutdown().await;
    }
}
