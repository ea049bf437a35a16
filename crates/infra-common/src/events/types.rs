//! Core types for the event bus.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A message carried on the bus.
///
/// The payload is deliberately untyped: bus consumers live in different
/// crates (and some outside this workspace entirely) and agree only on topic
/// names and JSON field names, never on Rust types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Topic the message was published under
    pub topic: String,
    /// Plain-data payload
    pub payload: Value,
    /// When the message entered the bus
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// Creates a message stamped now.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }

    /// Reads a string field from the payload, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Errors from bus operations.
#[derive(Debug, Error)]
pub enum EventError {
    /// The underlying broadcast channel failed
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// A timed receive expired before a message arrived
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Payload could not be serialized into a bus message
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for bus operations
pub type EventResult<T> = std::result::Result<T, EventError>;

/// Predicate applied to messages before a subscriber sees them.
pub type MessageFilter = Arc<dyn Fn(&BusMessage) -> bool + Send + Sync>;
