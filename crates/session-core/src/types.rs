//! Core types shared across the session lifecycle machinery.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a gateway session.
///
/// Assigned by the gateway when the session is created; opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of the phone core.
///
/// The phase doubles as the re-entrancy guard: operations that start a
/// build or teardown first check the phase under the state write lock and
/// bail out as logged no-ops when another attempt is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// No session exists and none is being built
    Idle,
    /// A session build is in flight (create, attach, register)
    Connecting,
    /// Session is up and the extension is registered
    Registered,
    /// Session lost or registration rejected; waiting for the health check
    /// or an external signal to try again
    Degraded,
    /// A voluntary teardown-and-rebuild is in flight
    Reloading,
    /// Application-level teardown completed
    Destroyed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Connecting => "Connecting",
            SessionPhase::Registered => "Registered",
            SessionPhase::Degraded => "Degraded",
            SessionPhase::Reloading => "Reloading",
            SessionPhase::Destroyed => "Destroyed",
        }
    }

    /// Whether a build attempt (connect or reload) is currently in flight.
    pub fn build_in_flight(&self) -> bool {
        matches!(self, SessionPhase::Connecting | SessionPhase::Reloading)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Idle
    }
}

/// Why a rebuild was chosen over reusing the existing session.
///
/// Diagnostic only: the rebuild sequence is identical for every reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildReason {
    /// The gateway session lost connectivity
    NotConnected,
    /// The session is connected but the extension is no longer registered
    NotRegistered,
    /// No gateway traffic for longer than the long inactivity threshold
    LongInactivity,
}

impl RebuildReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildReason::NotConnected => "not_connected",
            RebuildReason::NotRegistered => "not_registered",
            RebuildReason::LongInactivity => "long_inactivity",
        }
    }
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an automatic rebuild was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoReason {
    /// An incoming call offer is waiting for the user; rebuilding would
    /// destroy it
    PendingIncomingCall,
    /// A call is in progress and the staleness span is below the long
    /// threshold
    ActiveCall,
}

/// A remote session description received with an incoming call, held until
/// the user answers or the call goes away.
///
/// Session-scoped: cleared on accept, on hangup, and on every rebuild. It is
/// never carried into a recreated session, because the gateway negotiated it
/// against the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOffer {
    /// Caller identity (SIP URI or extension)
    pub from: String,
    /// Caller display name, when the gateway provided one
    pub display_name: Option<String>,
    /// The opaque session description payload
    pub jsep: Value,
    /// When the offer arrived
    pub received_at: DateTime<Utc>,
}

/// What triggered a staleness evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessTrigger {
    /// The page became visible after being hidden
    VisibilityRestored,
    /// The page resumed after the host froze it
    PageResumed,
    /// Network connectivity came back (browser online event or the
    /// application socket reconnecting)
    ConnectionRestored,
    /// An explicit reload command
    ForceReload,
}

impl StalenessTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            StalenessTrigger::VisibilityRestored => "visibility_restored",
            StalenessTrigger::PageResumed => "page_resumed",
            StalenessTrigger::ConnectionRestored => "connection_restored",
            StalenessTrigger::ForceReload => "force_reload",
        }
    }
}

/// Evidence that the session may have silently died while the page was
/// backgrounded, frozen, or offline.
///
/// Built by the activity monitor and handed to the manager in one message;
/// the manager owns the rebuild decision and the call-preservation veto.
#[derive(Debug, Clone)]
pub struct StalenessEvidence {
    /// How long the page was hidden, when the trigger involved visibility
    pub hidden_for: Option<Duration>,
    /// The host froze the page while it was backgrounded
    pub was_frozen: bool,
    /// The manager flagged the connection stale (transport error, failed
    /// keepalive) before this evaluation
    pub connection_stale: bool,
    /// What prompted the evaluation
    pub trigger: StalenessTrigger,
}

impl StalenessEvidence {
    /// Evidence for an explicit reload command.
    pub fn force_reload() -> Self {
        Self {
            hidden_for: None,
            was_frozen: false,
            connection_stale: false,
            trigger: StalenessTrigger::ForceReload,
        }
    }

    /// Evidence for a network-restored signal.
    pub fn connection_restored() -> Self {
        Self {
            hidden_for: None,
            was_frozen: false,
            connection_stale: true,
            trigger: StalenessTrigger::ConnectionRestored,
        }
    }
}

/// ICE connectivity of the current call's media path, as reported by the
/// gateway handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IceConnState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnState {
    /// Connected or Completed, the states in which media actually flows.
    pub fn is_established(&self) -> bool {
        matches!(self, IceConnState::Connected | IceConnState::Completed)
    }
}

impl Default for IceConnState {
    fn default() -> Self {
        IceConnState::New
    }
}

/// Whether any call state would be lost by destroying the session right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallPresence {
    /// An incoming offer is pending (not yet answered or declined)
    pub incoming: bool,
    /// A call is in progress (media path established)
    pub active: bool,
}

impl CallPresence {
    pub fn any(&self) -> bool {
        self.incoming || self.active
    }
}

/// Direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Incoming => "incoming",
            CallDirection::Outgoing => "outgoing",
        }
    }
}

/// The call currently owned by the signaling channel, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCall {
    /// Remote party (SIP URI or extension)
    pub peer: String,
    pub direction: CallDirection,
    /// The gateway confirmed the call as accepted
    pub accepted: bool,
    /// When the call was accepted
    pub connect_time: Option<DateTime<Utc>>,
}

impl ActiveCall {
    pub fn outgoing(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            direction: CallDirection::Outgoing,
            accepted: false,
            connect_time: None,
        }
    }

    pub fn incoming(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            direction: CallDirection::Incoming,
            accepted: false,
            connect_time: None,
        }
    }
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Which kind of endpoint answers calls for this widget.
///
/// The pending offer is captured for every incoming call regardless of this
/// setting; it only controls whether the ringing surface is shown in the
/// widget (a physical desk phone rings by itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerDevice {
    /// Calls are answered in the browser
    Webrtc,
    /// A physical desk phone answers; the widget only observes
    Physical,
    /// Some other endpoint answers
    Other,
}

impl Default for AnswerDevice {
    fn default() -> Self {
        AnswerDevice::Webrtc
    }
}

/// Desktop and mobile builds of the widget differ in who tears down the
/// media leg on hangup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserAgentClass {
    /// Enforce local hangup of the signaling channel
    Desktop,
    /// Leave teardown to the remote leg
    Mobile,
}

impl Default for UserAgentClass {
    fn default() -> Self {
        UserAgentClass::Desktop
    }
}

/// User-facing alert conditions raised and cleared by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// The WebRTC session is down and calls cannot be made or received
    WebrtcDown,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::WebrtcDown => "webrtc_down",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle counters, useful for diagnostics and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub sessions_created: u64,
    pub sessions_destroyed: u64,
    pub rebuilds_not_connected: u64,
    pub rebuilds_not_registered: u64,
    pub rebuilds_long_inactivity: u64,
    pub reloads_vetoed: u64,
    pub registrations: u64,
    pub failed_registrations: u64,
    pub keepalives_sent: u64,
}

impl SessionStats {
    pub(crate) fn record_rebuild(&mut self, reason: RebuildReason) {
        match reason {
            RebuildReason::NotConnected => self.rebuilds_not_connected += 1,
            RebuildReason::NotRegistered => self.rebuilds_not_registered += 1,
            RebuildReason::LongInactivity => self.rebuilds_long_inactivity += 1,
        }
    }

    /// Total rebuilds across all reasons.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds_not_connected + self.rebuilds_not_registered + self.rebuilds_long_inactivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_guard_helper() {
        assert!(SessionPhase::Connecting.build_in_flight());
        assert!(SessionPhase::Reloading.build_in_flight());
        assert!(!SessionPhase::Registered.build_in_flight());
        assert!(!SessionPhase::Idle.build_in_flight());
    }

    #[test]
    fn test_ice_established() {
        assert!(IceConnState::Connected.is_established());
        assert!(IceConnState::Completed.is_established());
        assert!(!IceConnState::Checking.is_established());
        assert!(!IceConnState::Disconnected.is_established());
    }

    #[test]
    fn test_rebuild_reason_labels() {
        assert_eq!(RebuildReason::NotConnected.as_str(), "not_connected");
        assert_eq!(RebuildReason::NotRegistered.as_str(), "not_registered");
        assert_eq!(RebuildReason::LongInactivity.as_str(), "long_inactivity");
    }

    #[test]
    fn test_stats_rebuild_counters() {
        let mut stats = SessionStats::default();
        stats.record_rebuild(RebuildReason::NotConnected);
        stats.record_rebuild(RebuildReason::LongInactivity);
        stats.record_rebuild(RebuildReason::LongInactivity);
        assert_eq!(stats.rebuilds_not_connected, 1);
        assert_eq!(stats.rebuilds_long_inactivity, 2);
        assert_eq!(stats.rebuilds(), 3);
    }
}
