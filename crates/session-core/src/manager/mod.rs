//! Session lifecycle manager.
//!
//! Owns the one live gateway session, the signaling channel bound to it,
//! and the shared [`PhoneStore`]. All lifecycle decisions run through here:
//!
//! - [`connect`](SessionManager::connect) builds a session or reuses the
//!   existing one,
//! - [`reload`](SessionManager::reload) weighs staleness evidence against
//!   the call-preservation veto and tears down and rebuilds when warranted,
//! - [`destroy`](SessionManager::destroy) is the application-level teardown,
//! - [`apply_gateway_event`](SessionManager::apply_gateway_event) (in
//!   `transitions`) is the single function every asynchronous gateway event
//!   goes through.
//!
//! The phase field in the store is the re-entrancy guard: build paths
//! check-and-set it under the store's write lock and back off when another
//! build is in flight. The init safety timer is the only thing that ever
//! forcibly releases the guard, and every build carries a generation stamp
//! so an attempt that outlived that release abandons at its next commit
//! point instead of publishing a second session.

mod policy;
mod transitions;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PhoneConfig;
use crate::devices::{self, AudioOutput, DeviceCache};
use crate::error::{SessionError, SessionResult};
use crate::events::{GatewayEvent, PhoneEvent};
use crate::gateway::{GatewaySession, SignalingChannel, SignalingGateway};
use crate::store::{PhoneState, PhoneStore};
use crate::types::{
    ActiveCall, AlertKind, AnswerDevice, RebuildReason, SessionPhase, SessionStats,
    StalenessEvidence, VetoReason,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What [`SessionManager::connect`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A session was built from scratch
    Connected,
    /// The existing session satisfied the reuse criteria and was kept
    Reused,
    /// The existing session failed the reuse criteria and was rebuilt
    Rebuilt(RebuildReason),
    /// A build was already in flight; this call was a logged no-op
    AlreadyInProgress,
}

/// What [`SessionManager::reload`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The evidence did not justify touching the session
    NotWarranted,
    /// Call state blocked the reload
    Vetoed(VetoReason),
    /// A build was already in flight; this call was a logged no-op
    AlreadyInProgress,
    /// The session was torn down and rebuilt
    Reloaded,
}

/// Live handles for the current gateway session.
///
/// Taken as a unit during teardown so no path can observe a session without
/// its channel or vice versa.
struct SessionHandles {
    session: Arc<dyn GatewaySession>,
    channel: Arc<dyn SignalingChannel>,
    /// Second channel on the same session carrying the screen-share leg
    screenshare: Option<Arc<dyn SignalingChannel>>,
    /// Task draining this session's event stream
    pump: JoinHandle<()>,
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    config: PhoneConfig,
    gateway: Arc<dyn SignalingGateway>,
    device_cache: Option<Arc<dyn DeviceCache>>,
    audio_output: Option<Arc<dyn AudioOutput>>,
}

impl SessionManagerBuilder {
    /// Persist and restore the preferred audio output across sessions.
    pub fn with_device_cache(mut self, cache: Arc<dyn DeviceCache>) -> Self {
        self.device_cache = Some(cache);
        self
    }

    /// Audio output control used when remote audio arrives.
    pub fn with_audio_output(mut self, audio: Arc<dyn AudioOutput>) -> Self {
        self.audio_output = Some(audio);
        self
    }

    /// Validates the configuration and builds the manager.
    pub fn build(self) -> SessionResult<Arc<SessionManager>> {
        self.config.validate()?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = PhoneStore::new(self.config.answer_device);
        Ok(Arc::new(SessionManager {
            config: self.config,
            gateway: self.gateway,
            store,
            handles: Mutex::new(None),
            safety: StdMutex::new(None),
            events_tx,
            stats: RwLock::new(SessionStats::default()),
            device_cache: self.device_cache,
            audio_output: self.audio_output,
        }))
    }
}

/// The session lifecycle manager.
pub struct SessionManager {
    config: PhoneConfig,
    gateway: Arc<dyn SignalingGateway>,
    store: PhoneStore,
    handles: Mutex<Option<SessionHandles>>,
    safety: StdMutex<Option<JoinHandle<()>>>,
    events_tx: broadcast::Sender<PhoneEvent>,
    stats: RwLock<SessionStats>,
    device_cache: Option<Arc<dyn DeviceCache>>,
    audio_output: Option<Arc<dyn AudioOutput>>,
}

enum BuildPlan {
    Fresh,
    Rebuild(RebuildReason),
}

enum ReloadDecision {
    Vetoed(VetoReason),
    Proceed(u64),
}

impl SessionManager {
    /// Start building a manager for the given configuration and gateway.
    pub fn builder(
        config: PhoneConfig,
        gateway: Arc<dyn SignalingGateway>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            gateway,
            device_cache: None,
            audio_output: None,
        }
    }

    pub fn config(&self) -> &PhoneConfig {
        &self.config
    }

    /// Cloned snapshot of the shared phone state.
    pub async fn snapshot(&self) -> PhoneState {
        self.store.snapshot().await
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> SessionPhase {
        self.store.phase().await
    }

    /// Cloned lifecycle counters.
    pub async fn stats(&self) -> SessionStats {
        self.stats.read().await.clone()
    }

    /// Subscribe to outward lifecycle announcements.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PhoneEvent> {
        self.events_tx.subscribe()
    }

    /// Change which endpoint answers calls.
    pub async fn set_answer_device(&self, device: AnswerDevice) {
        self.store.set_answer_device(device).await;
    }

    /// Ensures a usable session exists.
    ///
    /// Reuses the current session when it is connected, registered, and
    /// either recently active or carrying a call; otherwise tears it down
    /// and rebuilds. Resolves once the registration request has been sent;
    /// the registration confirmation arrives later as a gateway event.
    /// After [`destroy`](SessionManager::destroy) the phone is gone for
    /// good and connecting is an invalid-state error.
    pub async fn connect(self: &Arc<Self>) -> SessionResult<ConnectOutcome> {
        let session = {
            let handles = self.handles.lock().await;
            handles.as_ref().map(|h| h.session.clone())
        };
        let transport_up = session.as_ref().map(|s| s.is_connected()).unwrap_or(false);

        let (plan, build) = {
            let mut state = self.store.write().await;
            if state.phase.build_in_flight() {
                debug!("Connect ignored: a build is already in flight ({})", state.phase);
                return Ok(ConnectOutcome::AlreadyInProgress);
            }
            if state.phase == SessionPhase::Destroyed {
                debug!("Connect rejected: the phone was destroyed");
                return Err(SessionError::invalid_state("an attachable phone", "destroyed"));
            }
            if session.is_some() {
                // A transport failure clears the store flag even while the
                // handle still claims a connection; both have to agree.
                match policy::evaluate_reuse(
                    transport_up && state.session_connected,
                    state.registered,
                    state.inactivity(),
                    state.call_presence(),
                    self.config.long_inactivity,
                ) {
                    None => {
                        info!("Reusing existing session: connected, registered, recent activity");
                        return Ok(ConnectOutcome::Reused);
                    }
                    Some(reason) => {
                        info!("Session not reusable ({}), rebuilding", reason);
                        (
                            BuildPlan::Rebuild(reason),
                            state.begin_build(SessionPhase::Reloading),
                        )
                    }
                }
            } else {
                info!("Connecting to gateway at {}", self.config.gateway_url);
                (BuildPlan::Fresh, state.begin_build(SessionPhase::Connecting))
            }
        };

        if let BuildPlan::Rebuild(reason) = &plan {
            self.stats.write().await.record_rebuild(*reason);
            self.teardown_current("reload").await;
        }

        match self.build_session(build).await {
            Ok(()) => Ok(match plan {
                BuildPlan::Fresh => ConnectOutcome::Connected,
                BuildPlan::Rebuild(reason) => ConnectOutcome::Rebuilt(reason),
            }),
            Err(e) => {
                self.fail_build(build, &e).await;
                Err(e)
            }
        }
    }

    /// Weighs staleness evidence and rebuilds the session when warranted.
    ///
    /// The evidence gate runs before the call-preservation veto: a pending
    /// incoming offer always blocks the reload, and an established call
    /// blocks it while gateway inactivity is below the long threshold.
    pub async fn reload(
        self: &Arc<Self>,
        evidence: StalenessEvidence,
    ) -> SessionResult<ReloadOutcome> {
        let decision = {
            let mut state = self.store.write().await;
            if state.phase.build_in_flight() {
                debug!("Reload ignored: a build is already in flight ({})", state.phase);
                return Ok(ReloadOutcome::AlreadyInProgress);
            }
            if state.phase == SessionPhase::Destroyed {
                debug!("Reload ignored after destroy");
                return Ok(ReloadOutcome::NotWarranted);
            }
            if state.phase == SessionPhase::Idle {
                debug!("Reload ignored: phone was never attached");
                return Ok(ReloadOutcome::NotWarranted);
            }

            let mut evidence = evidence;
            evidence.connection_stale |= state.connection_stale;
            if !policy::staleness_warrants_reload(&evidence, self.config.short_inactivity) {
                debug!(
                    "Reload not warranted (trigger {}, hidden {:?})",
                    evidence.trigger.as_str(),
                    evidence.hidden_for
                );
                return Ok(ReloadOutcome::NotWarranted);
            }

            match policy::check_veto(
                state.call_presence(),
                Some(state.inactivity()),
                self.config.long_inactivity,
            ) {
                Some(veto) => {
                    info!("Reload vetoed to preserve call state ({:?})", veto);
                    ReloadDecision::Vetoed(veto)
                }
                None => {
                    info!("Reloading session (trigger {})", evidence.trigger.as_str());
                    ReloadDecision::Proceed(state.begin_build(SessionPhase::Reloading))
                }
            }
        };

        match decision {
            ReloadDecision::Vetoed(veto) => {
                self.stats.write().await.reloads_vetoed += 1;
                Ok(ReloadOutcome::Vetoed(veto))
            }
            ReloadDecision::Proceed(build) => {
                self.teardown_current("reload").await;
                match self.build_session(build).await {
                    Ok(()) => Ok(ReloadOutcome::Reloaded),
                    Err(e) => {
                        self.fail_build(build, &e).await;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Application-level teardown. Idempotent.
    ///
    /// Marks the phase destroyed before touching the gateway, so the
    /// session's own `destroyed` notification is recognized as voluntary
    /// and raises no alert.
    pub async fn destroy(&self) -> SessionResult<()> {
        {
            let mut state = self.store.write().await;
            if state.phase == SessionPhase::Destroyed {
                debug!("Destroy ignored: already destroyed");
                return Ok(());
            }
            info!("Destroying phone session");
            state.phase = SessionPhase::Destroyed;
        }

        self.teardown_current("destroyed").await;

        let removed = {
            let mut state = self.store.write().await;
            state.alert.take()
        };
        if let Some(alert) = removed {
            self.emit(PhoneEvent::AlertRemoved { alert });
        }
        Ok(())
    }

    // ---- call control ----

    /// Places an outbound call.
    pub async fn dial(&self, target: &str) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        {
            let mut state = self.store.write().await;
            if state.phase != SessionPhase::Registered || !state.registered {
                return Err(SessionError::NotRegistered);
            }
            if state.call.is_some() || state.pending_offer.is_some() {
                return Err(SessionError::invalid_state("an idle line", "a call in progress"));
            }
            state.call = Some(ActiveCall::outgoing(target));
            state.outbound_in_progress = true;
        }

        info!("Calling {}", target);
        if let Err(e) = channel.call(target).await {
            let mut state = self.store.write().await;
            state.call = None;
            state.outbound_in_progress = false;
            return Err(e);
        }
        Ok(())
    }

    /// Answers the pending incoming call.
    ///
    /// On failure the offer is declined with 480 and cleared; it is not
    /// left dangling for a second attempt against a gateway that already
    /// rejected the answer.
    pub async fn answer(&self) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        let Some(offer) = self.store.pending_offer().await else {
            return Err(SessionError::invalid_state(
                "a pending incoming call",
                "no pending offer",
            ));
        };

        info!("Answering call from {}", offer.from);
        match channel.answer(offer.jsep.clone()).await {
            Ok(()) => {
                let mut state = self.store.write().await;
                state.pending_offer = None;
                state.ringing = false;
                state.ringback = false;
                state.call = Some(ActiveCall::incoming(offer.from));
                state.stamp_activity();
                Ok(())
            }
            Err(e) => {
                warn!("Answer failed ({}), declining the offer", e);
                if let Err(decline_err) = channel.decline(480).await {
                    debug!("Decline after failed answer also failed: {}", decline_err);
                }
                {
                    let mut state = self.store.write().await;
                    state.pending_offer = None;
                    state.ringing = false;
                }
                self.emit(PhoneEvent::CallEnded {
                    reason: Some("answer-failed".into()),
                });
                Err(e)
            }
        }
    }

    /// Declines the pending incoming call with a SIP rejection code.
    pub async fn decline(&self, code: u16) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        let had_offer = {
            let mut state = self.store.write().await;
            let had = state.pending_offer.take().is_some();
            state.ringing = false;
            had
        };
        if !had_offer {
            return Err(SessionError::invalid_state(
                "a pending incoming call",
                "no pending offer",
            ));
        }

        info!("Declining incoming call with {}", code);
        self.emit(PhoneEvent::CallEnded {
            reason: Some("declined".into()),
        });
        channel.decline(code).await
    }

    /// Hangs up whatever call state exists: an established call, an
    /// outbound attempt, or a pending offer. The call is gone locally
    /// either way; a channel failure is still returned.
    pub async fn hangup(&self) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        let (had_any, had_share) = {
            let mut state = self.store.write().await;
            let had_any = state.call.is_some()
                || state.pending_offer.is_some()
                || state.outbound_in_progress;
            state.pending_offer = None;
            state.call = None;
            state.ringing = false;
            state.ringback = false;
            state.muted = false;
            state.held = false;
            state.outbound_in_progress = false;
            let had_share = state.screenshare_active;
            state.screenshare_active = false;
            (had_any, had_share)
        };
        if !had_any {
            return Err(SessionError::invalid_state("a call in progress", "no call"));
        }

        if had_share {
            self.detach_screenshare().await;
        }

        info!("Hanging up");
        // The call state is already cleared above; the ended event follows
        // it regardless of the channel result.
        let result = channel.hangup().await;
        if let Err(e) = &result {
            warn!("Hangup request failed: {}", e);
        }
        self.emit(PhoneEvent::CallEnded {
            reason: Some("hangup".into()),
        });
        result
    }

    /// Puts the current call on or off hold.
    pub async fn hold(&self, on: bool) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        let snap = self.store.snapshot().await;
        if snap.call.is_none() {
            return Err(SessionError::invalid_state("a call in progress", "no call"));
        }
        if snap.held == on {
            debug!("Hold no-op: already {}", if on { "held" } else { "resumed" });
            return Ok(());
        }

        channel.hold(on).await?;
        self.store.set_held(on).await;
        self.emit(if on { PhoneEvent::CallHeld } else { PhoneEvent::CallUnheld });
        Ok(())
    }

    /// Mutes or unmutes the local audio.
    pub async fn mute(&self, on: bool) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        let snap = self.store.snapshot().await;
        if snap.call.is_none() {
            return Err(SessionError::invalid_state("a call in progress", "no call"));
        }
        if snap.muted == on {
            debug!("Mute no-op: already {}", if on { "muted" } else { "unmuted" });
            return Ok(());
        }

        channel.mute(on).await?;
        self.store.set_muted(on).await;
        self.emit(if on { PhoneEvent::CallMuted } else { PhoneEvent::CallUnmuted });
        Ok(())
    }

    /// Sends DTMF digits on the accepted call.
    pub async fn send_dtmf(&self, digits: &str) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        let snap = self.store.snapshot().await;
        if !snap.call.as_ref().is_some_and(|c| c.accepted) {
            return Err(SessionError::invalid_state("an accepted call", "no accepted call"));
        }
        debug!("Sending DTMF ({} digits)", digits.len());
        channel.send_dtmf(digits).await
    }

    /// Transfers the current call to another target.
    pub async fn transfer(&self, target: &str) -> SessionResult<()> {
        let channel = self.require_channel().await?;
        if self.store.snapshot().await.call.is_none() {
            return Err(SessionError::invalid_state("a call in progress", "no call"));
        }
        info!("Transferring call to {}", target);
        channel.transfer(target).await
    }

    /// Attaches a second signaling channel on the current session and
    /// dials the call's peer on it, carrying the screen-share media.
    pub async fn start_screen_share(&self) -> SessionResult<()> {
        let session = {
            let handles = self.handles.lock().await;
            handles
                .as_ref()
                .map(|h| h.session.clone())
                .ok_or(SessionError::NotRegistered)?
        };
        let snap = self.store.snapshot().await;
        let Some(call) = snap.call.as_ref().filter(|c| c.accepted) else {
            return Err(SessionError::invalid_state("an accepted call", "no accepted call"));
        };
        if snap.screenshare_active {
            debug!("Screen share already active");
            return Ok(());
        }

        let share = session.attach_signaling().await?;
        share.call(&call.peer).await?;
        {
            let mut handles = self.handles.lock().await;
            if let Some(h) = handles.as_mut() {
                h.screenshare = Some(share);
            }
        }
        self.store.write().await.screenshare_active = true;
        info!("Screen-share leg attached toward {}", call.peer);
        Ok(())
    }

    /// Detaches the screen-share leg, if one is up.
    pub async fn stop_screen_share(&self) -> SessionResult<()> {
        self.store.write().await.screenshare_active = false;
        self.detach_screenshare().await;
        Ok(())
    }

    // ---- health ----

    /// One pass of the periodic health check.
    ///
    /// While registered, re-sends the registration as a keepalive. While
    /// degraded, attempts recovery through the normal connect path. Never
    /// retries inline on failure; the next tick is the retry.
    pub async fn health_tick(self: &Arc<Self>) {
        match self.store.phase().await {
            SessionPhase::Registered => {
                let Some(channel) = self.require_channel().await.ok() else {
                    return;
                };
                let request = self.config.registration_request();
                match channel.register(&request).await {
                    Ok(()) => {
                        self.stats.write().await.keepalives_sent += 1;
                        debug!("Keepalive register sent for {}", request.extension);
                    }
                    Err(e) => {
                        warn!("Keepalive register failed: {}", e);
                        self.on_transport_failure("keepalive").await;
                    }
                }
            }
            SessionPhase::Degraded => {
                debug!("Health check: attempting recovery");
                match self.connect().await {
                    Ok(outcome) => info!("Recovery attempt finished: {:?}", outcome),
                    Err(e) => warn!("Recovery attempt failed: {}", e),
                }
            }
            _ => {}
        }
    }

    /// Flags the transport as suspect without touching the session.
    pub(crate) async fn mark_connection_stale(&self) {
        let mut state = self.store.write().await;
        if !state.connection_stale {
            debug!("Connection flagged stale");
            state.connection_stale = true;
        }
    }

    /// Handle to the shared state store.
    ///
    /// Hosts use it for the call-control setters (ringback playback state,
    /// locally captured track ids); lifecycle state is only ever written
    /// through the manager.
    pub fn store(&self) -> &PhoneStore {
        &self.store
    }

    // ---- internals ----

    fn emit(&self, event: PhoneEvent) {
        if self.events_tx.send(event.clone()).is_err() {
            debug!("No subscribers for {:?}", event);
        }
    }

    async fn require_channel(&self) -> SessionResult<Arc<dyn SignalingChannel>> {
        let handles = self.handles.lock().await;
        handles
            .as_ref()
            .map(|h| h.channel.clone())
            .ok_or(SessionError::NotRegistered)
    }

    async fn detach_screenshare(&self) {
        let share = {
            let mut handles = self.handles.lock().await;
            handles.as_mut().and_then(|h| h.screenshare.take())
        };
        if let Some(share) = share {
            if let Err(e) = share.detach().await {
                debug!("Screen-share detach failed: {}", e);
            }
        }
    }

    /// Forgets the current handles without touching the gateway. Used when
    /// the session is already gone server-side; dropping the pump's join
    /// handle detaches the task, which ends with the dead stream.
    async fn drop_handles(&self) {
        let _ = self.handles.lock().await.take();
    }

    /// Creates the session, wires its event pump, attaches the signaling
    /// channel, and sends the registration. The caller has already set the
    /// build phase and stamped `build` via [`PhoneState::begin_build`].
    ///
    /// The stamp is re-checked after every gateway await: once the safety
    /// timer has released the guard and a newer build (or a destroy) has
    /// moved the store on, this build destroys whatever it created and
    /// bails instead of publishing a second session.
    async fn build_session(self: &Arc<Self>, build: u64) -> SessionResult<()> {
        self.arm_safety_timer();

        let created = self.gateway.create_session().await?;
        let session = created.session;
        let session_id = session.id();

        if self.build_superseded(build).await {
            debug!("Build abandoned after create: no longer the current build");
            if let Err(e) = session.destroy().await {
                debug!("Destroy of abandoned session failed: {}", e);
            }
            return Err(SessionError::invalid_state("a build in flight", "superseded"));
        }

        info!("Gateway session {} created", session_id);
        self.stats.write().await.sessions_created += 1;
        let pump = self.spawn_event_pump(created.events);

        let channel = match session.attach_signaling().await {
            Ok(channel) => channel,
            Err(e) => {
                pump.abort();
                if let Err(destroy_err) = session.destroy().await {
                    debug!("Destroy after failed attach failed: {}", destroy_err);
                }
                return Err(e);
            }
        };

        // Commit point. The identity write and the handle install happen
        // under the store lock that re-validates the build, so a stale
        // build can never install its session over a newer one's.
        let committed = {
            let mut state = self.store.write().await;
            if state.phase == SessionPhase::Destroyed || state.build_seq != build {
                pump.abort();
                false
            } else {
                state.session_id = Some(session_id);
                state.session_created_at = Some(Utc::now());
                state.session_connected = true;
                state.stamp_activity();
                let mut handles = self.handles.lock().await;
                *handles = Some(SessionHandles {
                    session: session.clone(),
                    channel: channel.clone(),
                    screenshare: None,
                    pump,
                });
                true
            }
        };
        if !committed {
            debug!("Build abandoned at commit: no longer the current build");
            if let Err(e) = session.destroy().await {
                debug!("Destroy of abandoned session failed: {}", e);
            }
            self.stats.write().await.sessions_destroyed += 1;
            return Err(SessionError::invalid_state("a build in flight", "superseded"));
        }

        let request = self.config.registration_request();
        debug!("Registering {}", request.uri());
        channel.register(&request).await?;
        Ok(())
    }

    /// Whether `build` has lost the right to finish: the phone was
    /// destroyed, or the guard was released and a newer build stamped the
    /// store.
    async fn build_superseded(&self, build: u64) -> bool {
        let state = self.store.read().await;
        state.phase == SessionPhase::Destroyed || state.build_seq != build
    }

    /// Marks the build attempt failed: degraded phase, staleness flag, and
    /// the alert raised at most once. The health check owns the retry.
    ///
    /// A failure reported by a superseded build changes nothing; the
    /// current build owns the phase, the alert, and the safety timer.
    async fn fail_build(&self, build: u64, error: &SessionError) {
        let raise = {
            let mut state = self.store.write().await;
            if state.build_seq != build {
                debug!("Superseded build failed ({}); state untouched", error);
                return;
            }
            warn!("Session build failed: {}", error);
            state.connection_stale = true;
            if state.phase == SessionPhase::Destroyed {
                false
            } else {
                state.phase = SessionPhase::Degraded;
                if state.alert.is_none() {
                    state.alert = Some(AlertKind::WebrtcDown);
                    true
                } else {
                    false
                }
            }
        };
        self.disarm_safety_timer();
        if raise {
            self.emit(PhoneEvent::AlertSet {
                alert: AlertKind::WebrtcDown,
            });
        }
    }

    /// Fixed teardown order: unregister, detach, destroy, then clear the
    /// session-scoped state. The same sequence runs for every teardown
    /// cause; every gateway step is best-effort and none of them waits for
    /// an acknowledgement. The pump is aborted first so the teardown's own
    /// notifications are never misread as involuntary.
    async fn teardown_current(&self, cause: &'static str) {
        self.disarm_safety_timer();

        let handles = self.handles.lock().await.take();

        if let Some(handles) = handles {
            handles.pump.abort();
            if let Err(e) = handles.channel.unregister().await {
                debug!("Unregister during teardown failed: {}", e);
            }
            if let Some(share) = handles.screenshare {
                if let Err(e) = share.detach().await {
                    debug!("Screen-share detach during teardown failed: {}", e);
                }
            }
            if let Err(e) = handles.channel.detach().await {
                debug!("Channel detach during teardown failed: {}", e);
            }
            if let Err(e) = handles.session.destroy().await {
                debug!("Session destroy request failed: {}", e);
            }
            self.stats.write().await.sessions_destroyed += 1;
            info!("Session torn down ({})", cause);
        }

        let (had_call, announce_unregistered) = {
            let mut state = self.store.write().await;
            let had_call = state.call.is_some();
            let was_reg = state.registered;
            state.clear_session_scope();
            (had_call, was_reg)
        };
        if had_call {
            self.emit(PhoneEvent::CallEnded {
                reason: Some(cause.to_string()),
            });
        }
        if announce_unregistered {
            self.emit(PhoneEvent::Unregistered);
        }
    }

    /// Shared failure path for transport-level trouble: keepalive failures
    /// and transport error events.
    pub(crate) async fn on_transport_failure(&self, context: &str) {
        let raise = {
            let mut state = self.store.write().await;
            state.session_connected = false;
            state.connection_stale = true;
            if state.phase == SessionPhase::Destroyed || state.phase.build_in_flight() {
                false
            } else {
                state.phase = SessionPhase::Degraded;
                if state.alert.is_none() {
                    state.alert = Some(AlertKind::WebrtcDown);
                    true
                } else {
                    false
                }
            }
        };
        if raise {
            warn!("Transport failure ({}); phone degraded", context);
            self.emit(PhoneEvent::AlertSet {
                alert: AlertKind::WebrtcDown,
            });
        }
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<GatewayEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.apply_gateway_event(event).await;
            }
            debug!("Gateway event stream ended");
        })
    }

    /// Arms the init safety timer for the build that just started. If the
    /// phase is still a build phase when it fires, the guard is released
    /// and the phone goes degraded. This is the only forced abort.
    fn arm_safety_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        // The countdown starts now, not at the task's first poll; a busy
        // event loop must not stretch the window.
        let deadline = tokio::time::Instant::now() + self.config.init_safety_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(manager) = weak.upgrade() {
                manager.on_init_timeout().await;
            }
        });
        let mut slot = self.safety.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn disarm_safety_timer(&self) {
        let handle = self.safety.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn on_init_timeout(&self) {
        let raise = {
            let mut state = self.store.write().await;
            if !state.phase.build_in_flight() {
                return;
            }
            warn!(
                "Session build still in flight after {:?}; releasing the guard",
                self.config.init_safety_timeout
            );
            state.phase = SessionPhase::Degraded;
            state.connection_stale = true;
            if state.alert.is_none() {
                state.alert = Some(AlertKind::WebrtcDown);
                true
            } else {
                false
            }
        };
        if raise {
            self.emit(PhoneEvent::AlertSet {
                alert: AlertKind::WebrtcDown,
            });
        }
    }

    pub(crate) async fn reapply_audio_output(&self) {
        let (Some(cache), Some(audio)) = (&self.device_cache, &self.audio_output) else {
            return;
        };
        if let Err(e) = devices::reapply_output(cache.as_ref(), audio.as_ref()).await {
            debug!("Audio output reapply failed: {}", e);
        }
    }
}
