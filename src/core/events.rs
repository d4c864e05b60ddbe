//! # Rule Change Events
//!
//! Writes to routes or blacklist rules are followed by a `RuleEvent`. Subscribers
//! (the route table and the blacklist snapshot) reload their whole data set when one
//! arrives, so duplicate deliveries are harmless.
//!
//! Inside one process the events travel over a `tokio::sync::broadcast` channel.
//! With more than one gateway instance the bus is bridged over Redis pub/sub: writes
//! publish to the Redis channel and every instance (including the writer) re-broadcasts
//! what it receives locally.

use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEvent {
    RoutesChanged,
    BlacklistChanged,
}

struct RemotePublisher {
    connection: ConnectionManager,
    channel: String,
}

/// In-process event bus with an optional Redis pub/sub leg
pub struct EventBus {
    sender: broadcast::Sender<RuleEvent>,
    remote: Option<RemotePublisher>,
}

impl EventBus {
    /// Local-only bus
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, remote: None }
    }

    /// Bus whose events go through a Redis channel first
    ///
    /// Pair this with [`spawn_redis_bridge`] on the same channel, otherwise nothing
    /// arrives locally.
    pub fn with_redis(capacity: usize, connection: ConnectionManager, channel: String) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            remote: Some(RemotePublisher { connection, channel }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a change event
    ///
    /// Never fails: a Redis publish error falls back to local delivery so at least
    /// this instance refreshes.
    pub async fn publish(&self, event: RuleEvent) {
        if let Some(remote) = &self.remote {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    let mut connection = remote.connection.clone();
                    match connection.publish::<_, _, i64>(&remote.channel, payload).await {
                        Ok(receivers) => {
                            debug!(?event, receivers, channel = %remote.channel, "Published rule event");
                            return;
                        }
                        Err(e) => {
                            warn!(?event, error = %e, "Failed to publish rule event to Redis, delivering locally");
                        }
                    }
                }
                Err(e) => {
                    error!(?event, error = %e, "Failed to serialize rule event");
                }
            }
        }
        self.dispatch_local(event);
    }

    /// Deliver to local subscribers only
    pub fn dispatch_local(&self, event: RuleEvent) {
        // No subscribers is fine during startup and in tests
        if self.sender.send(event).is_err() {
            debug!(?event, "Rule event had no local subscribers");
        }
    }
}

/// Forward events from a Redis channel onto the local bus, reconnecting on failure
pub fn spawn_redis_bridge(client: redis::Client, channel: String, bus: Arc<EventBus>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let connection = match client.get_async_connection().await {
                Ok(connection) => connection,
                Err(e) => {
                    error!(error = %e, "Failed to open Redis pub/sub connection, retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let mut pubsub = connection.into_pubsub();
            if let Err(e) = pubsub.subscribe(channel.as_str()).await {
                error!(error = %e, channel = %channel, "Failed to subscribe to rule events, retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            info!(channel = %channel, "Subscribed to rule change events");

            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Failed to read rule event payload");
                        continue;
                    }
                };
                match serde_json::from_str::<RuleEvent>(&payload) {
                    Ok(event) => bus.dispatch_local(event),
                    Err(e) => warn!(error = %e, payload = %payload, "Ignoring malformed rule event"),
                }
            }

            warn!(channel = %channel, "Redis pub/sub stream ended, reconnecting in 5s");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    })
}
