//! Event types flowing through the session core.
//!
//! Two directions, two types:
//!
//! - [`GatewayEvent`]: everything the gateway reports asynchronously, as one
//!   sealed enum. Every variant is dispatched through the single transition
//!   function on the manager, so the complete reaction to any gateway
//!   message is readable in one place.
//! - [`PhoneEvent`]: what the lifecycle announces outward. The bus bridge
//!   converts these to named bus topics with plain JSON payloads.

use serde_json::{json, Value};

use crate::types::{AlertKind, CallDirection, IceConnState, TrackKind};

/// Asynchronous events from the gateway session and its signaling channel.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The extension registered with the SIP proxy
    Registered { extension: String },
    /// The proxy rejected the registration
    RegistrationFailed { code: u16, reason: String },
    /// The extension is no longer registered
    Unregistered,
    /// An outbound call invitation was sent
    Calling,
    /// The remote side is ringing. `early_media` means audio is already
    /// flowing and no local ringback should be generated.
    Ringing { early_media: bool },
    /// Early media session description from the remote side
    Progress { jsep: Value },
    /// An incoming call offer
    IncomingCall {
        from: String,
        display_name: Option<String>,
        jsep: Value,
    },
    /// The call was accepted; an answer description may accompany it
    Accepted { jsep: Option<Value> },
    /// The call ended
    Hangup { code: Option<u16>, reason: Option<String> },
    /// ICE connectivity of the media path changed
    IceStateChanged { state: IceConnState },
    /// A remote media track became available
    RemoteTrackAdded { kind: TrackKind, track_id: String },
    /// A remote media track went away
    RemoteTrackRemoved { track_id: String },
    /// The remote side asked for a video keyframe
    KeyframeRequest,
    /// The signaling transport failed
    TransportError { reason: String },
    /// The gateway announced it is shutting down or unreachable
    GatewayDown,
    /// The gateway session was destroyed
    Destroyed,
    /// A gateway-level error not tied to the transport
    Error { code: u16, reason: String },
}

impl GatewayEvent {
    /// Stable lower-case name, used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            GatewayEvent::Registered { .. } => "registered",
            GatewayEvent::RegistrationFailed { .. } => "registration_failed",
            GatewayEvent::Unregistered => "unregistered",
            GatewayEvent::Calling => "calling",
            GatewayEvent::Ringing { .. } => "ringing",
            GatewayEvent::Progress { .. } => "progress",
            GatewayEvent::IncomingCall { .. } => "incomingcall",
            GatewayEvent::Accepted { .. } => "accepted",
            GatewayEvent::Hangup { .. } => "hangup",
            GatewayEvent::IceStateChanged { .. } => "ice_state",
            GatewayEvent::RemoteTrackAdded { .. } => "remote_track_added",
            GatewayEvent::RemoteTrackRemoved { .. } => "remote_track_removed",
            GatewayEvent::KeyframeRequest => "keyframe_request",
            GatewayEvent::TransportError { .. } => "transport_error",
            GatewayEvent::GatewayDown => "gateway_down",
            GatewayEvent::Destroyed => "destroyed",
            GatewayEvent::Error { .. } => "error",
        }
    }
}

/// Bus topic names used by the phone core.
///
/// Consumers outside this workspace couple to these strings, so they are
/// part of the public contract and must stay stable.
pub mod topics {
    // Outward announcements
    pub const ATTACHED: &str = "phone:attached";
    pub const REGISTERED: &str = "phone:registered";
    pub const UNREGISTERED: &str = "phone:unregistered";
    pub const CALL_STARTED: &str = "phone:call-started";
    pub const CALL_ENDED: &str = "phone:call-ended";
    pub const CALL_MUTED: &str = "phone:call-muted";
    pub const CALL_UNMUTED: &str = "phone:call-unmuted";
    pub const CALL_HELD: &str = "phone:call-held";
    pub const CALL_UNHELD: &str = "phone:call-unheld";
    pub const ALERT_SET: &str = "phone:alert-set";
    pub const ALERT_REMOVED: &str = "phone:alert-removed";
    pub const FULLSCREEN_CHANGED: &str = "phone:fullscreen-changed";

    // Inbound commands
    pub const ATTACH: &str = "phone:attach";
    pub const FORCE_RELOAD: &str = "phone:force-reload";
    pub const TRANSFER: &str = "phone:transfer";
    pub const SOCKET_RECONNECTED: &str = "socket:reconnected";
    pub const FULLSCREEN_ON: &str = "phone:fullscreen-on";
    pub const FULLSCREEN_OFF: &str = "phone:fullscreen-off";
}

/// Outward announcements produced by lifecycle transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum PhoneEvent {
    Registered { extension: String },
    Unregistered,
    CallStarted { peer: String, direction: CallDirection },
    CallEnded { reason: Option<String> },
    CallMuted,
    CallUnmuted,
    CallHeld,
    CallUnheld,
    AlertSet { alert: AlertKind },
    AlertRemoved { alert: AlertKind },
}

impl PhoneEvent {
    /// The bus topic this event is published under.
    pub fn topic(&self) -> &'static str {
        match self {
            PhoneEvent::Registered { .. } => topics::REGISTERED,
            PhoneEvent::Unregistered => topics::UNREGISTERED,
            PhoneEvent::CallStarted { .. } => topics::CALL_STARTED,
            PhoneEvent::CallEnded { .. } => topics::CALL_ENDED,
            PhoneEvent::CallMuted => topics::CALL_MUTED,
            PhoneEvent::CallUnmuted => topics::CALL_UNMUTED,
            PhoneEvent::CallHeld => topics::CALL_HELD,
            PhoneEvent::CallUnheld => topics::CALL_UNHELD,
            PhoneEvent::AlertSet { .. } => topics::ALERT_SET,
            PhoneEvent::AlertRemoved { .. } => topics::ALERT_REMOVED,
        }
    }

    /// Plain-data payload published with the event.
    pub fn payload(&self) -> Value {
        match self {
            PhoneEvent::Registered { extension } => json!({ "extension": extension }),
            PhoneEvent::Unregistered => json!({}),
            PhoneEvent::CallStarted { peer, direction } => {
                json!({ "peer": peer, "direction": direction.as_str() })
            }
            PhoneEvent::CallEnded { reason } => json!({ "reason": reason }),
            PhoneEvent::CallMuted => json!({ "muted": true }),
            PhoneEvent::CallUnmuted => json!({ "muted": false }),
            PhoneEvent::CallHeld => json!({ "held": true }),
            PhoneEvent::CallUnheld => json!({ "held": false }),
            PhoneEvent::AlertSet { alert } => json!({ "alert": alert.as_str() }),
            PhoneEvent::AlertRemoved { alert } => json!({ "alert": alert.as_str() }),
        }
    }
}
