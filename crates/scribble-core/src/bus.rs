//! Pub/sub transport abstraction.
//!
//! Server instances share room events through topics. The [`PubSub`] trait
//! is the seam where a networked broker plugs in; [`LocalBus`] is the
//! in-process implementation used by single-instance deployments and tests.
//! Delivery is at-most-once with no acknowledgement.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Maximum topic name length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Default per-topic buffer.
const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Pub/sub errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// Backend-specific failure, e.g. a lost broker connection.
    #[error("Bus backend error: {0}")]
    Backend(String),
}

/// Validate a topic name.
///
/// # Errors
///
/// Returns a description of the first problem found.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("Topic cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err("Topic too long");
    }
    if !topic.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic contains invalid characters");
    }
    Ok(())
}

/// A publish/subscribe transport keyed by topic.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload. Returns the number of subscribers reached, where
    /// the backend can tell.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize, BusError>;

    /// Open a subscription to a topic.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;
}

/// A stream of payloads from one topic. Dropping it ends the subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<Bytes>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a receiver fed by a backend.
    #[must_use]
    pub fn new(topic: impl Into<String>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            rx,
            forwarder: None,
        }
    }

    /// Attach the backend task feeding this subscription; it is aborted on drop.
    #[must_use]
    pub fn with_forwarder(mut self, handle: JoinHandle<()>) -> Self {
        self.forwarder = Some(handle);
        self
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload, or `None` when the topic is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

/// In-process pub/sub built on broadcast channels.
#[derive(Debug)]
pub struct LocalBus {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of known topics, including ones awaiting pruning.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Live subscribers on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LocalBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize, BusError> {
        validate_topic(topic).map_err(BusError::InvalidTopic)?;

        let sent = match self.topics.get(topic) {
            Some(sender) => sender.send(payload).unwrap_or_default(),
            None => {
                trace!(topic = %topic, "Publish to topic without subscribers");
                return Ok(0);
            }
        };

        if sent == 0 {
            self.topics.remove_if(topic, |_, s| s.receiver_count() == 0);
            debug!(topic = %topic, "Pruned topic without subscribers");
        }
        trace!(topic = %topic, recipients = sent, "Published");
        Ok(sent)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        validate_topic(topic).map_err(BusError::InvalidTopic)?;

        let mut rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let (tx, out) = mpsc::channel(self.capacity);
        let name = topic.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %name, skipped = n, "Subscriber lagged, events skipped");
                    }
                }
            }
        });

        debug!(topic = %topic, "Subscribed");
        Ok(Subscription::new(topic, out).with_forwarder(forwarder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("room:abc").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic(&"a".repeat(MAX_TOPIC_LENGTH + 1)).is_err());
        assert!(validate_topic("room:\u{7}").is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("room:1").await.unwrap();
        let mut b = bus.subscribe("room:1").await.unwrap();

        let sent = bus.publish("room:1", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(sent, 2);
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("room:1").await.unwrap();
        let _b = bus.subscribe("room:2").await.unwrap();

        bus.publish("room:2", Bytes::from_static(b"other")).await.unwrap();
        bus.publish("room:1", Bytes::from_static(b"mine")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"mine"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = LocalBus::new();
        assert_eq!(bus.publish("room:none", Bytes::from_static(b"x")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let bus = LocalBus::new();
        let sub = bus.subscribe("room:1").await.unwrap();
        assert_eq!(bus.subscriber_count("room:1"), 1);

        drop(sub);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.publish("room:1", Bytes::from_static(b"x")).await.unwrap(), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_topic() {
        let bus = LocalBus::new();
        assert!(matches!(
            bus.subscribe("").await,
            Err(BusError::InvalidTopic(_))
        ));
    }
}
