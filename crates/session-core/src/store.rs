//! Shared phone state store.
//!
//! One [`PhoneState`] per widget, behind a single `RwLock`. The lifecycle
//! manager is the only writer of the session-identity subset (phase, session
//! id, connectivity, registration, pending offer); call-control flags have
//! dedicated setters. Everyone else reads cloned snapshots.
//!
//! Holding the single lock across the phase check and the phase write is
//! what makes the phase usable as a re-entrancy guard.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::types::{
    ActiveCall, AlertKind, AnswerDevice, CallPresence, IceConnState, PendingOffer, SessionId,
    SessionPhase,
};

/// The complete shared state of one phone widget.
#[derive(Debug, Clone)]
pub struct PhoneState {
    /// Lifecycle phase; doubles as the re-entrancy guard
    pub phase: SessionPhase,
    /// Generation of the most recently started build; stale builds see a
    /// newer value at their commit points and abandon
    pub(crate) build_seq: u64,
    /// Gateway-assigned id of the current session
    pub session_id: Option<SessionId>,
    /// When the current session was created
    pub session_created_at: Option<DateTime<Utc>>,
    /// Transport connectivity of the current session
    pub session_connected: bool,
    /// The extension is registered with the proxy
    pub registered: bool,
    /// Incoming call offer waiting for an answer
    pub pending_offer: Option<PendingOffer>,
    /// ICE connectivity of the current call's media path
    pub ice_state: IceConnState,
    /// The call currently owned by the signaling channel
    pub call: Option<ActiveCall>,
    /// Incoming ring surfaced to the widget UI
    pub ringing: bool,
    /// Local ringback tone should be playing
    pub ringback: bool,
    /// Local audio is muted
    pub muted: bool,
    /// The call is on hold
    pub held: bool,
    /// An outbound invitation is in flight
    pub outbound_in_progress: bool,
    /// Which endpoint answers calls
    pub answer_device: AnswerDevice,
    /// Track ids of local media
    pub local_tracks: Vec<String>,
    /// Track ids of remote media
    pub remote_tracks: Vec<String>,
    /// A screen-share channel is attached
    pub screenshare_active: bool,
    /// Currently raised user-facing alert
    pub alert: Option<AlertKind>,
    /// The manager has reason to believe the transport is dead
    pub connection_stale: bool,
    /// Last moment the gateway showed signs of life
    pub last_activity: tokio::time::Instant,
}

impl PhoneState {
    fn new(answer_device: AnswerDevice) -> Self {
        Self {
            phase: SessionPhase::Idle,
            build_seq: 0,
            session_id: None,
            session_created_at: None,
            session_connected: false,
            registered: false,
            pending_offer: None,
            ice_state: IceConnState::New,
            call: None,
            ringing: false,
            ringback: false,
            muted: false,
            held: false,
            outbound_in_progress: false,
            answer_device,
            local_tracks: Vec::new(),
            remote_tracks: Vec::new(),
            screenshare_active: false,
            alert: None,
            connection_stale: false,
            last_activity: tokio::time::Instant::now(),
        }
    }

    /// Whether destroying the session now would lose call state.
    ///
    /// `active` follows the media path: a call counts as in progress once
    /// ICE reports an established pair, and stops counting when it drops.
    pub fn call_presence(&self) -> CallPresence {
        CallPresence {
            incoming: self.pending_offer.is_some(),
            active: self.ice_state.is_established(),
        }
    }

    /// Time since the gateway last showed signs of life.
    pub fn inactivity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub(crate) fn stamp_activity(&mut self) {
        self.last_activity = tokio::time::Instant::now();
    }

    /// Enters a build phase and stamps the new build's generation.
    ///
    /// The returned value identifies the build. It is re-checked at the
    /// build's commit points, so an attempt that lost the guard to the
    /// safety timer and was replaced by a newer build abandons instead of
    /// publishing a second session.
    pub(crate) fn begin_build(&mut self, phase: SessionPhase) -> u64 {
        self.phase = phase;
        self.build_seq = self.build_seq.wrapping_add(1);
        self.build_seq
    }

    /// Invalidates any build still in flight. Used when the session it is
    /// building is already gone.
    pub(crate) fn invalidate_build(&mut self) {
        self.build_seq = self.build_seq.wrapping_add(1);
    }

    /// Wipes everything scoped to the current session.
    ///
    /// Runs on every teardown, voluntary or not. The alert, the staleness
    /// flag, and the answer device survive: the first two describe the
    /// outage rather than the session, and the third is widget config.
    pub(crate) fn clear_session_scope(&mut self) {
        self.session_id = None;
        self.session_created_at = None;
        self.session_connected = false;
        self.registered = false;
        self.pending_offer = None;
        self.ice_state = IceConnState::New;
        self.call = None;
        self.ringing = false;
        self.ringback = false;
        self.muted = false;
        self.held = false;
        self.outbound_in_progress = false;
        self.local_tracks.clear();
        self.remote_tracks.clear();
        self.screenshare_active = false;
    }
}

/// Handle to the shared phone state.
///
/// Cloning is cheap; all clones point at the same state.
#[derive(Clone)]
pub struct PhoneStore {
    inner: Arc<RwLock<PhoneState>>,
}

impl PhoneStore {
    pub fn new(answer_device: AnswerDevice) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PhoneState::new(answer_device))),
        }
    }

    /// Cloned snapshot of the full state.
    pub async fn snapshot(&self) -> PhoneState {
        self.inner.read().await.clone()
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> SessionPhase {
        self.inner.read().await.phase
    }

    /// Whether the extension is registered.
    pub async fn registered(&self) -> bool {
        self.inner.read().await.registered
    }

    /// The pending incoming offer, if any.
    pub async fn pending_offer(&self) -> Option<PendingOffer> {
        self.inner.read().await.pending_offer.clone()
    }

    /// Current call presence.
    pub async fn call_presence(&self) -> CallPresence {
        self.inner.read().await.call_presence()
    }

    /// Currently raised alert, if any.
    pub async fn current_alert(&self) -> Option<AlertKind> {
        self.inner.read().await.alert
    }

    /// Mirrors the mute flag after the gateway accepted a mute request.
    pub async fn set_muted(&self, muted: bool) {
        let mut state = self.inner.write().await;
        debug!("Store: muted {} -> {}", state.muted, muted);
        state.muted = muted;
    }

    /// Mirrors the hold flag after the gateway accepted a hold request.
    pub async fn set_held(&self, held: bool) {
        let mut state = self.inner.write().await;
        debug!("Store: held {} -> {}", state.held, held);
        state.held = held;
    }

    /// Flips the local ringback flag.
    pub async fn set_ringback(&self, on: bool) {
        let mut state = self.inner.write().await;
        if state.ringback != on {
            debug!("Store: ringback {} -> {}", state.ringback, on);
            state.ringback = on;
        }
    }

    /// Records the track ids of locally captured media.
    ///
    /// Capture happens in the host; it reports what it publishes into the
    /// session here so snapshots describe both directions.
    pub async fn set_local_tracks(&self, tracks: Vec<String>) {
        let mut state = self.inner.write().await;
        debug!("Store: local tracks {:?} -> {:?}", state.local_tracks, tracks);
        state.local_tracks = tracks;
    }

    /// Changes which endpoint answers calls.
    pub async fn set_answer_device(&self, device: AnswerDevice) {
        let mut state = self.inner.write().await;
        debug!("Store: answer device {:?} -> {:?}", state.answer_device, device);
        state.answer_device = device;
    }

    /// Read access for the lifecycle manager.
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, PhoneState> {
        self.inner.read().await
    }

    /// Write access for the lifecycle manager.
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, PhoneState> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let store = PhoneStore::new(AnswerDevice::Webrtc);
        let snap = store.snapshot().await;
        assert_eq!(snap.phase, SessionPhase::Idle);

        store.set_muted(true).await;
        // The earlier snapshot does not observe later writes.
        assert!(!snap.muted);
        assert!(store.snapshot().await.muted);
    }

    #[tokio::test]
    async fn test_clear_session_scope_keeps_alert_and_staleness() {
        let store = PhoneStore::new(AnswerDevice::Webrtc);
        {
            let mut state = store.write().await;
            state.session_id = Some(SessionId::new("s-1"));
            state.registered = true;
            state.pending_offer = Some(PendingOffer {
                from: "sip:100@pbx".into(),
                display_name: None,
                jsep: json!({ "type": "offer" }),
                received_at: Utc::now(),
            });
            state.alert = Some(AlertKind::WebrtcDown);
            state.connection_stale = true;
            state.clear_session_scope();
        }

        let snap = store.snapshot().await;
        assert!(snap.session_id.is_none());
        assert!(!snap.registered);
        assert!(snap.pending_offer.is_none());
        assert_eq!(snap.alert, Some(AlertKind::WebrtcDown));
        assert!(snap.connection_stale);
    }

    #[tokio::test]
    async fn test_each_build_gets_a_fresh_generation() {
        let store = PhoneStore::new(AnswerDevice::Webrtc);
        let first = store.write().await.begin_build(SessionPhase::Connecting);
        let second = store.write().await.begin_build(SessionPhase::Reloading);
        assert_ne!(first, second);

        let mut state = store.write().await;
        assert_eq!(state.phase, SessionPhase::Reloading);
        assert_eq!(state.build_seq, second);
        state.invalidate_build();
        assert_ne!(state.build_seq, second);

        // Teardown keeps the generation; only new builds and
        // invalidations move it.
        state.clear_session_scope();
        let kept = state.build_seq;
        drop(state);
        assert_eq!(store.read().await.build_seq, kept);
    }

    #[tokio::test]
    async fn test_call_presence_follows_ice_and_offer() {
        let store = PhoneStore::new(AnswerDevice::Webrtc);
        assert!(!store.call_presence().await.any());

        {
            let mut state = store.write().await;
            state.pending_offer = Some(PendingOffer {
                from: "sip:100@pbx".into(),
                display_name: None,
                jsep: json!({}),
                received_at: Utc::now(),
            });
        }
        let presence = store.call_presence().await;
        assert!(presence.incoming);
        assert!(!presence.active);

        {
            let mut state = store.write().await;
            state.pending_offer = None;
            state.ice_state = IceConnState::Connected;
        }
        let presence = store.call_presence().await;
        assert!(!presence.incoming);
        assert!(presence.active);
    }
}
