//! Named-topic publish/subscribe event bus.
//!
//! Topics are stable, namespaced string names (`"phone:registered"`,
//! `"socket:reconnected"`). Payloads are plain JSON data objects so any
//! component can consume them without compile-time coupling to the producer.
//! Publishing to a topic nobody subscribes to is a no-op by design.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, Publisher, Subscription};
pub use types::{BusMessage, EventError, EventResult, MessageFilter};
