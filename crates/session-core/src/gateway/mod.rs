//! Gateway abstraction: the seam between the lifecycle core and whatever
//! actually speaks to the WebRTC gateway.
//!
//! Three object-safe traits mirror the gateway's own object model:
//!
//! - [`SignalingGateway`]: the gateway endpoint; creates sessions.
//! - [`GatewaySession`]: one server-side session. Owns connectivity and the
//!   asynchronous event stream. At most one non-destroyed session exists per
//!   manager at any time.
//! - [`SignalingChannel`]: a plugin handle bound to a live session, carrying
//!   SIP registration and call control. The screen-share leg, when used, is
//!   simply a second channel on the same session.
//!
//! Every method that talks to the gateway resolves when the *request* is
//! accepted for delivery. Confirmation arrives later as a [`GatewayEvent`]
//! on the session's event stream; teardown in particular never waits for
//! acknowledgements.

pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::RegistrationRequest;
use crate::error::SessionResult;
use crate::events::GatewayEvent;
use crate::types::SessionId;

/// A freshly created gateway session together with its event stream.
///
/// The receiver is the only consumer of this session's events; the manager
/// pumps it from a single task so event order is preserved.
pub struct CreatedSession {
    pub session: Arc<dyn GatewaySession>,
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
}

/// The gateway endpoint.
#[async_trait]
pub trait SignalingGateway: Send + Sync {
    /// Creates a new server-side session.
    async fn create_session(&self) -> SessionResult<CreatedSession>;
}

/// One live gateway session.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    /// The gateway-assigned session identifier.
    fn id(&self) -> SessionId;

    /// Whether the session's transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Attaches a signaling channel to this session. May be called more
    /// than once; each call yields an independent channel.
    async fn attach_signaling(&self) -> SessionResult<Arc<dyn SignalingChannel>>;

    /// Requests destruction of the session. Resolves when the request is
    /// sent, not when the gateway confirms.
    async fn destroy(&self) -> SessionResult<()>;
}

/// A signaling plugin handle bound to a live session.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Registers the extension with the SIP proxy.
    async fn register(&self, request: &RegistrationRequest) -> SessionResult<()>;

    /// Drops the registration.
    async fn unregister(&self) -> SessionResult<()>;

    /// Places an outbound call.
    async fn call(&self, target: &str) -> SessionResult<()>;

    /// Answers the pending incoming call with its offer description.
    async fn answer(&self, jsep: Value) -> SessionResult<()>;

    /// Declines the pending incoming call with a SIP rejection code.
    async fn decline(&self, code: u16) -> SessionResult<()>;

    /// Hangs up the current call.
    async fn hangup(&self) -> SessionResult<()>;

    /// Puts the current call on or off hold.
    async fn hold(&self, on: bool) -> SessionResult<()>;

    /// Mutes or unmutes the local audio.
    async fn mute(&self, on: bool) -> SessionResult<()>;

    /// Sends DTMF digits on the current call.
    async fn send_dtmf(&self, digits: &str) -> SessionResult<()>;

    /// Transfers the current call to another target.
    async fn transfer(&self, target: &str) -> SessionResult<()>;

    /// Applies a remote answer or early-media description.
    async fn apply_remote_description(&self, jsep: Value) -> SessionResult<()>;

    /// Sends a keyframe-request control message on the current call.
    async fn request_keyframe(&self) -> SessionResult<()>;

    /// Detaches the channel from its session. Resolves when the request is
    /// sent.
    async fn detach(&self) -> SessionResult<()>;
}
