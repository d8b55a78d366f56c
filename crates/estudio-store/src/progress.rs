//! Fan-out of job change events.
//!
//! Subscribers always read from a local broadcast channel. With the memory
//! backend events are sent straight into it. With the Redis backend events
//! are published on a Redis channel and a relay task feeds every message back
//! into the local channel, so subscribers on any replica see every change.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use estudio_models::JobEvent;

use crate::error::StoreResult;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Delay between attempts to restore a dropped Redis subscription.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Broadcast channel for job events. Subscribers that fall more than the
/// channel capacity behind lose the oldest events.
#[derive(Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<JobEvent>,
    relay: Option<Arc<RedisRelay>>,
}

impl ProgressChannel {
    /// Channel local to this process.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, relay: None }
    }

    /// Channel shared by every process subscribed to `channel` on Redis.
    pub async fn connect_redis(
        redis_url: &str,
        channel: impl Into<String>,
        capacity: usize,
    ) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let channel = channel.into();
        let pubsub = subscribe(&client, &channel).await?;

        let (tx, _) = broadcast::channel(capacity.max(1));
        let listener = tokio::spawn(relay_events(client, channel.clone(), pubsub, tx.clone()));

        info!(channel = %channel, "Relaying job events through Redis");

        Ok(Self {
            tx,
            relay: Some(Arc::new(RedisRelay {
                conn,
                channel,
                listener,
            })),
        })
    }

    /// Publish an event.
    ///
    /// Returns how many receivers got it: local subscribers for an in-process
    /// channel, subscribed processes for a Redis channel.
    pub async fn publish(&self, event: JobEvent) -> usize {
        let Some(relay) = &self.relay else {
            return self.send_local(event);
        };

        match relay.publish(&event).await {
            Ok(receivers) => {
                trace!(job_id = %event.job_id, receivers, "Published job event to Redis");
                receivers
            }
            Err(e) => {
                warn!(
                    job_id = %event.job_id,
                    error = %e,
                    "Failed to publish job event to Redis, delivering locally"
                );
                self.send_local(event)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send_local(&self, event: JobEvent) -> usize {
        let job_id = event.job_id.clone();
        // No subscribers is fine.
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(job_id = %job_id, delivered, "Published job event");
        delivered
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Publishing side of a Redis-backed channel. The relay task stops when the
/// last clone of the channel is dropped.
struct RedisRelay {
    conn: MultiplexedConnection,
    channel: String,
    listener: JoinHandle<()>,
}

impl RedisRelay {
    async fn publish(&self, event: &JobEvent) -> StoreResult<usize> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(&self.channel, payload).await?;
        Ok(receivers)
    }
}

impl Drop for RedisRelay {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn subscribe(client: &redis::Client, channel: &str) -> StoreResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Forward Redis messages into the local channel, resubscribing whenever the
/// subscription drops.
async fn relay_events(
    client: redis::Client,
    channel: String,
    mut pubsub: PubSub,
    tx: broadcast::Sender<JobEvent>,
) {
    loop {
        let messages = pubsub.into_on_message();
        tokio::pin!(messages);

        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Dropping unreadable job event");
                    continue;
                }
            };
            match serde_json::from_str::<JobEvent>(&payload) {
                Ok(event) => {
                    let delivered = tx.send(event).unwrap_or(0);
                    trace!(delivered, "Relayed job event");
                }
                Err(e) => warn!(channel = %channel, error = %e, "Dropping undecodable job event"),
            }
        }

        warn!(channel = %channel, "Job event subscription closed, resubscribing");
        pubsub = loop {
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            match subscribe(&client, &channel).await {
                Ok(pubsub) => break pubsub,
                Err(e) => debug!(channel = %channel, error = %e, "Resubscribe failed"),
            }
        };
        info!(channel = %channel, "Job event subscription restored");
    }
}
