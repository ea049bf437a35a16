//! The event bus itself: topic registry, publishers, subscriptions.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::types::{BusMessage, EventError, EventResult, MessageFilter};

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of each per-topic broadcast channel. Slow subscribers that
    /// fall further behind than this lose the oldest messages.
    pub channel_capacity: usize,
    /// Default timeout for timed receives
    pub default_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            default_timeout: Duration::from_secs(1),
        }
    }
}

/// Process-wide publish/subscribe bus keyed by topic name.
///
/// Cloning is cheap; all clones share the same topic registry. Publishing to
/// a topic with no live subscribers is a no-op, which lets producers emit
/// unconditionally without knowing who (if anyone) is listening.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<DashMap<String, broadcast::Sender<Arc<BusMessage>>>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Creates a bus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        debug!("Created EventBus with config: {:?}", config);
        Self {
            topics: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Creates a bus with default configuration.
    pub fn new_default() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Publishes a payload under a topic.
    ///
    /// Returns the number of subscribers the message was delivered to.
    /// Zero is not an error.
    pub async fn publish(&self, topic: &str, payload: Value) -> EventResult<usize> {
        let message = Arc::new(BusMessage::new(topic, payload));

        let Some(sender) = self.topics.get(topic).map(|entry| entry.clone()) else {
            debug!("No subscribers for topic '{}', dropping message", topic);
            return Ok(0);
        };

        match sender.send(message) {
            Ok(count) => Ok(count),
            Err(_) => {
                // All receivers dropped since the topic was registered.
                debug!("All subscribers gone for topic '{}', dropping message", topic);
                Ok(0)
            }
        }
    }

    /// Subscribes to a topic, creating its channel if this is the first
    /// subscriber.
    pub async fn subscribe(&self, topic: &str) -> Subscription {
        let receiver = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0)
            .subscribe();

        debug!("New subscription on topic '{}'", topic);
        Subscription {
            topic: topic.to_string(),
            receiver,
            filter: None,
            default_timeout: self.config.default_timeout,
        }
    }

    /// Creates a publisher bound to one topic.
    pub fn publisher(&self, topic: &str) -> Publisher {
        Publisher {
            bus: self.clone(),
            topic: topic.to_string(),
        }
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|entry| entry.receiver_count())
            .unwrap_or(0)
    }
}

/// A publisher bound to a single topic.
pub struct Publisher {
    bus: EventBus,
    topic: String,
}

impl Publisher {
    /// Publishes a payload on the bound topic.
    pub async fn publish(&self, payload: Value) -> EventResult<usize> {
        self.bus.publish(&self.topic, payload).await
    }

    /// The topic this publisher is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// A live subscription to one topic.
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Arc<BusMessage>>,
    filter: Option<MessageFilter>,
    default_timeout: Duration,
}

impl Subscription {
    /// The topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Restricts the subscription to messages passing a predicate.
    ///
    /// Chaining combines predicates with AND.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&BusMessage) -> bool + Send + Sync + 'static,
    {
        self.filter = match self.filter.take() {
            Some(existing) => Some(Arc::new(move |msg: &BusMessage| {
                existing(msg) && filter(msg)
            })),
            None => Some(Arc::new(filter)),
        };
        self
    }

    fn passes(&self, message: &BusMessage) -> bool {
        self.filter.as_ref().map_or(true, |f| f(message))
    }

    /// Receives one message from the underlying channel, skipping over lag
    /// gaps. Lagging only loses the oldest messages; the subscription stays
    /// usable.
    async fn recv_raw(&mut self) -> EventResult<Arc<BusMessage>> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription on '{}' lagged, {} messages dropped",
                        self.topic, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventError::ChannelError(format!(
                        "Topic '{}' channel closed",
                        self.topic
                    )));
                }
            }
        }
    }

    /// Waits for the next message that passes the filter.
    pub async fn recv(&mut self) -> EventResult<Arc<BusMessage>> {
        loop {
            let message = self.recv_raw().await?;
            if self.passes(&message) {
                return Ok(message);
            }
        }
    }

    /// Waits for the next matching message, up to `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> EventResult<Arc<BusMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(EventError::Timeout(format!(
                    "Timeout after {:?} waiting on topic '{}'",
                    timeout, self.topic
                )));
            }

            match tokio::time::timeout(remaining, self.recv_raw()).await {
                Ok(Ok(message)) => {
                    if self.passes(&message) {
                        return Ok(message);
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(EventError::Timeout(format!(
                        "Timeout after {:?} waiting on topic '{}'",
                        timeout, self.topic
                    )));
                }
            }
        }
    }

    /// Waits for the next matching message using the bus default timeout.
    pub async fn recv_default_timeout(&mut self) -> EventResult<Arc<BusMessage>> {
        let timeout = self.default_timeout;
        self.recv_timeout(timeout).await
    }

    /// Returns the next matching message if one is already buffered.
    pub fn try_recv(&mut self) -> EventResult<Option<Arc<BusMessage>>> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if self.passes(&message) {
                        return Ok(Some(message));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription on '{}' lagged, {} messages dropped",
                        self.topic, skipped
                    );
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventError::ChannelError(format!(
                        "Topic '{}' channel closed",
                        self.topic
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let bus = EventBus::new_default();
        let mut sub = bus.subscribe("phone:registered").await;

        let delivered = assert_ok!(
            bus.publish("phone:registered", json!({ "extension": "1004" }))
                .await
        );
        assert_eq!(delivered, 1);

        let msg = sub.recv_timeout(Duration::from_millis(100)).await.unwrap();
        assert_eq!(msg.topic, "phone:registered");
        assert_eq!(msg.str_field("extension"), Some("1004"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new_default();

        let delivered = bus
            .publish("phone:unregistered", json!({}))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_fanout_to_multiple_subscribers() {
        let bus = EventBus::new_default();
        let mut first = bus.subscribe("phone:call-started").await;
        let mut second = bus.subscribe("phone:call-started").await;

        let delivered = bus
            .publish("phone:call-started", json!({ "peer": "sip:200@pbx" }))
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(
            first
                .recv_timeout(Duration::from_millis(100))
                .await
                .unwrap()
                .str_field("peer"),
            Some("sip:200@pbx")
        );
        assert_eq!(
            second
                .recv_timeout(Duration::from_millis(100))
                .await
                .unwrap()
                .str_field("peer"),
            Some("sip:200@pbx")
        );
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new_default();
        let mut sub = bus.subscribe("phone:call-ended").await;

        bus.publish("phone:call-started", json!({})).await.unwrap();

        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::new_default();
        let mut sub = bus
            .subscribe("phone:alert-set")
            .await
            .with_filter(|msg| msg.str_field("alert") == Some("webrtc_down"));

        bus.publish("phone:alert-set", json!({ "alert": "mic_muted" }))
            .await
            .unwrap();
        bus.publish("phone:alert-set", json!({ "alert": "webrtc_down" }))
            .await
            .unwrap();

        let msg = sub.recv_timeout(Duration::from_millis(100)).await.unwrap();
        assert_eq!(msg.str_field("alert"), Some("webrtc_down"));
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chained_filters_combine_with_and() {
        let bus = EventBus::new_default();
        let mut sub = bus
            .subscribe("test:numbers")
            .await
            .with_filter(|msg| msg.payload["n"].as_i64().unwrap_or(0) > 3)
            .with_filter(|msg| msg.payload["n"].as_i64().unwrap_or(0) < 8);

        for n in 0..10 {
            bus.publish("test:numbers", json!({ "n": n })).await.unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(Some(msg)) = sub.try_recv() {
            seen.push(msg.payload["n"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let bus = EventBus::new_default();
        let mut sub = bus.subscribe("test:silence").await;

        let result = sub.recv_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(EventError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_publisher_binds_topic() {
        let bus = EventBus::new_default();
        let mut sub = bus.subscribe("phone:call-muted").await;

        let publisher = bus.publisher("phone:call-muted");
        assert_eq!(publisher.topic(), "phone:call-muted");
        publisher.publish(json!({ "muted": true })).await.unwrap();

        let msg = sub.recv_timeout(Duration::from_millis(100)).await.unwrap();
        assert_eq!(msg.payload["muted"], json!(true));
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let bus = EventBus::new_default();
        assert_eq!(bus.subscriber_count("test:count"), 0);

        let _a = bus.subscribe("test:count").await;
        let _b = bus.subscribe("test:count").await;
        assert_eq!(bus.subscriber_count("test:count"), 2);

        drop(_a);
        assert_eq!(bus.subscriber_count("test:count"), 1);
    }
}
