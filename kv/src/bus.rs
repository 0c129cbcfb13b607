use futures::StreamExt;
use redis::aio::PubSub;
use tracing::instrument;

use crate::error::KvError;

/// Dedicated pub/sub connection, separate from the RPC `Kv` connection so a
/// blocking `SUBSCRIBE` never starves ordinary reads (spec.md §5 "the KV
/// pub/sub connection is separate from the RPC connection").
pub struct Bus {
    client: redis::Client,
}

impl Bus {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    #[instrument(skip(self, payload), fields(channel))]
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Opens a fresh subscription to `channels`. Each call gets its own
    /// `PubSub` connection; the Fan-out Gateway keeps one such subscription
    /// alive per room it has at least one local subscriber for.
    pub async fn subscribe(&self, channels: &[String]) -> Result<Subscription, KvError> {
        let mut pubsub: PubSub = self.client.get_async_pubsub().await?;
        for ch in channels {
            pubsub.subscribe(ch).await?;
        }
        Ok(Subscription { pubsub })
    }
}

pub struct Subscription {
    pubsub: PubSub,
}

impl Subscription {
    pub async fn subscribe(&mut self, channel: &str) -> Result<(), KvError> {
        self.pubsub.subscribe(channel).await?;
        Ok(())
    }

    pub async fn unsubscribe(&mut self, channel: &str) -> Result<(), KvError> {
        self.pubsub.unsubscribe(channel).await?;
        Ok(())
    }

    /// Waits for the next published message, returning `(channel, payload)`.
    pub async fn next(&mut self) -> Option<(String, String)> {
        let msg = self.pubsub.on_message().next().await?;
        let channel = msg.get_channel_name().to_string();
        let payload: String = msg.get_payload().ok()?;
        Some((channel, payload))
    }
}
