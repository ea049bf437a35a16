//! # wephone-session-core
//!
//! Session lifecycle core for the wephone browser softphone: establishment,
//! monitoring, and recovery of SIP-over-WebRTC gateway sessions.
//!
//! The crate owns exactly one live gateway session per manager and treats it
//! as disposable: when the session goes stale (hidden tab, frozen page, lost
//! network, silent gateway) it is torn down and rebuilt rather than patched
//! up. The hard part is deciding *when* that is safe, which is why call
//! preservation is wired into every rebuild path.
//!
//! # Key Components
//!
//! - [`manager::SessionManager`]: owns the session, the signaling channel,
//!   and every lifecycle decision. All asynchronous gateway events dispatch
//!   through one transition function.
//! - [`monitor::ActivityMonitor`]: turns page visibility, freeze, and
//!   network signals into staleness evidence and runs the periodic health
//!   check.
//! - [`bridge::EventBusBridge`]: republishes lifecycle announcements on the
//!   page event bus and accepts the bus command topics.
//! - [`gateway`]: the traits the real gateway transport implements, plus a
//!   scriptable mock for tests.
//! - [`store::PhoneStore`]: the shared state snapshot every component reads.
//!
//! # Lifecycle
//!
//! The phase moves `Idle -> Connecting -> Registered`, with `Reloading` for
//! voluntary rebuilds, `Degraded` after failures (the health check owns the
//! retry), and `Destroyed` after application teardown. The phase itself is
//! the re-entrancy guard: a second build attempt while one is in flight is
//! a logged no-op, and only the init safety timer ever force-releases it.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use wephone_session_core::config::PhoneConfig;
//! use wephone_session_core::gateway::mock::MockGateway;
//! use wephone_session_core::manager::SessionManager;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PhoneConfig::new("wss://gateway.example.com/ws", "1004", "s3cret")
//!     .with_proxy("pbx.example.com", 5060)
//!     .with_display_name("Alice");
//!
//! let manager = SessionManager::builder(config, Arc::new(MockGateway::new())).build()?;
//! manager.connect().await?;
//!
//! // Registration is confirmed asynchronously via the gateway event
//! // stream; subscribe_events() announces it.
//! let mut events = manager.subscribe_events();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod devices;
pub mod error;
pub mod events;
pub mod gateway;
pub mod manager;
pub mod monitor;
pub mod store;
pub mod types;

pub use bridge::EventBusBridge;
pub use config::PhoneConfig;
pub use error::{SessionError, SessionResult};
pub use events::{GatewayEvent, PhoneEvent};
pub use manager::{ConnectOutcome, ReloadOutcome, SessionManager, SessionManagerBuilder};
pub use monitor::{ActivityMonitor, PageSignal};
pub use store::{PhoneState, PhoneStore};
pub use types::{
    ActiveCall, AlertKind, AnswerDevice, CallDirection, CallPresence, IceConnState, PendingOffer,
    RebuildReason, SessionId, SessionPhase, SessionStats, StalenessEvidence, StalenessTrigger,
    UserAgentClass, VetoReason,
};
