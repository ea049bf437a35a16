//! Common infrastructure for the wephone stack.
//!
//! This crate provides the pieces every wephone component leans on but that
//! belong to none of them:
//!
//! - **Event bus** ([`events`]): a process-wide publish/subscribe bus where
//!   topics are stable string names and payloads are plain JSON data objects.
//!   Components coordinate through the bus without holding references to each
//!   other.
//! - **Logging** ([`logging`]): tracing subscriber setup shared by binaries
//!   and test harnesses.
//!
//! # Example
//!
//! ```rust
//! use wephone_infra_common::events::bus::EventBus;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::new_default();
//! let mut sub = bus.subscribe("phone:registered").await;
//!
//! bus.publish("phone:registered", json!({ "extension": "1004" })).await?;
//!
//! let msg = sub.recv().await?;
//! assert_eq!(msg.topic, "phone:registered");
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod events;
pub mod logging;

pub use errors::types::{Error, Result};
pub use events::bus::{EventBus, EventBusConfig, Publisher, Subscription};
pub use events::types::{BusMessage, EventError, EventResult};
