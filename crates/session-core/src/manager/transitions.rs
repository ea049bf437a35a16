//! The single transition function for asynchronous gateway events.
//!
//! Every event from the session's stream lands in
//! [`SessionManager::apply_gateway_event`], so the complete reaction to any
//! gateway message is readable in one place. Each arm follows the same
//! shape: mutate the store under its write lock, capture what follow-up
//! work is needed, drop the lock, then run channel operations and emit
//! outward events.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::SessionManager;
use crate::events::{GatewayEvent, PhoneEvent};
use crate::types::{
    ActiveCall, AlertKind, AnswerDevice, IceConnState, PendingOffer, SessionPhase, TrackKind,
    UserAgentClass,
};

impl SessionManager {
    pub(crate) async fn apply_gateway_event(&self, event: GatewayEvent) {
        if self.store().phase().await == SessionPhase::Destroyed {
            debug!("Ignoring gateway event '{}' after destroy", event.type_name());
            return;
        }
        debug!("Gateway event: {}", event.type_name());

        match event {
            GatewayEvent::Registered { extension } => self.on_registered(extension).await,
            GatewayEvent::RegistrationFailed { code, reason } => {
                self.on_registration_failed(code, reason).await
            }
            GatewayEvent::Unregistered => self.on_unregistered().await,
            GatewayEvent::Calling => {
                let mut state = self.store().write().await;
                state.outbound_in_progress = true;
                state.stamp_activity();
            }
            GatewayEvent::Ringing { early_media } => self.on_ringing(early_media).await,
            GatewayEvent::Progress { jsep } => {
                {
                    let mut state = self.store().write().await;
                    // Early media replaces the locally generated ringback.
                    state.ringback = false;
                    state.stamp_activity();
                }
                if let Ok(channel) = self.require_channel().await {
                    if let Err(e) = channel.apply_remote_description(jsep).await {
                        warn!("Applying early media description failed: {}", e);
                    }
                }
            }
            GatewayEvent::IncomingCall {
                from,
                display_name,
                jsep,
            } => self.on_incoming_call(from, display_name, jsep).await,
            GatewayEvent::Accepted { jsep } => self.on_accepted(jsep).await,
            GatewayEvent::Hangup { code, reason } => self.on_hangup(code, reason).await,
            GatewayEvent::IceStateChanged { state: ice } => {
                let mut state = self.store().write().await;
                debug!("ICE state {:?} -> {:?}", state.ice_state, ice);
                state.ice_state = ice;
                state.stamp_activity();
                if ice == IceConnState::Failed {
                    warn!("ICE failed; flagging the connection stale");
                    state.connection_stale = true;
                }
            }
            GatewayEvent::RemoteTrackAdded { kind, track_id } => {
                self.on_remote_track_added(kind, track_id).await
            }
            GatewayEvent::RemoteTrackRemoved { track_id } => {
                let mut state = self.store().write().await;
                state.remote_tracks.retain(|id| id != &track_id);
                state.stamp_activity();
            }
            GatewayEvent::KeyframeRequest => self.on_keyframe_request().await,
            GatewayEvent::TransportError { reason } => {
                warn!("Signaling transport error: {}", reason);
                self.on_transport_failure("transport error").await;
            }
            GatewayEvent::GatewayDown => {
                // Advisory only; gateway health is reported upstream through
                // other channels. A real outage surfaces as TransportError.
                warn!("Gateway reported down");
            }
            GatewayEvent::Destroyed => self.on_destroyed().await,
            GatewayEvent::Error { code, reason } => self.on_gateway_error(code, reason).await,
        }
    }

    /// Registration confirmed: the build (or keepalive) succeeded. Clears
    /// the alert and the staleness flag; the safety timer is disarmed
    /// because the guard no longer needs releasing.
    async fn on_registered(&self, extension: String) {
        self.disarm_safety_timer();
        let cleared = {
            let mut state = self.store().write().await;
            state.registered = true;
            state.session_connected = true;
            state.connection_stale = false;
            state.phase = SessionPhase::Registered;
            state.stamp_activity();
            state.alert.take()
        };
        self.stats.write().await.registrations += 1;

        info!("Registered as {}", extension);
        self.emit(PhoneEvent::Registered { extension });
        if let Some(alert) = cleared {
            self.emit(PhoneEvent::AlertRemoved { alert });
        }
    }

    /// The proxy rejected the registration. No inline retry: the phone goes
    /// degraded and the health check owns the next attempt.
    async fn on_registration_failed(&self, code: u16, reason: String) {
        warn!("Registration failed: {} {}", code, reason);
        self.disarm_safety_timer();
        let raise = {
            let mut state = self.store().write().await;
            state.registered = false;
            state.phase = SessionPhase::Degraded;
            if state.alert.is_none() {
                state.alert = Some(AlertKind::WebrtcDown);
                true
            } else {
                false
            }
        };
        self.stats.write().await.failed_registrations += 1;
        if raise {
            self.emit(PhoneEvent::AlertSet {
                alert: AlertKind::WebrtcDown,
            });
        }
    }

    /// Registration dropped outside a teardown we initiated ourselves.
    async fn on_unregistered(&self) {
        let (announce, raise) = {
            let mut state = self.store().write().await;
            if !state.registered {
                return;
            }
            state.registered = false;
            if state.phase.build_in_flight() {
                // A rebuild is already underway; it will re-register.
                (true, false)
            } else {
                state.phase = SessionPhase::Degraded;
                let raise = if state.alert.is_none() {
                    state.alert = Some(AlertKind::WebrtcDown);
                    true
                } else {
                    false
                };
                (true, raise)
            }
        };

        warn!("Registration lost");
        if announce {
            self.emit(PhoneEvent::Unregistered);
        }
        if raise {
            self.emit(PhoneEvent::AlertSet {
                alert: AlertKind::WebrtcDown,
            });
        }
    }

    /// Remote ringing on an outbound call. Without early media the widget
    /// generates ringback locally; with it the remote audio is the tone.
    async fn on_ringing(&self, early_media: bool) {
        let mut state = self.store().write().await;
        state.stamp_activity();
        if state.outbound_in_progress && !early_media && !state.ringback {
            debug!("Remote ringing, starting local ringback");
            state.ringback = true;
        }
    }

    /// An incoming offer. Captured whenever the line is free, regardless of
    /// which device answers; the ringing surface is only raised for the
    /// browser device, since a desk phone rings by itself.
    async fn on_incoming_call(
        &self,
        from: String,
        display_name: Option<String>,
        jsep: serde_json::Value,
    ) {
        let mut state = self.store().write().await;
        state.stamp_activity();
        if state.call.is_some() || state.pending_offer.is_some() {
            warn!("Incoming call from {} while busy; leaving it to the gateway", from);
            return;
        }

        info!("Incoming call from {}", from);
        state.ringing = state.answer_device == AnswerDevice::Webrtc;
        state.pending_offer = Some(PendingOffer {
            from,
            display_name,
            jsep,
            received_at: Utc::now(),
        });
    }

    /// The call is confirmed. Covers both directions: the remote side
    /// answering our invitation (an answer description accompanies it) and
    /// the gateway confirming an incoming call that was answered here or on
    /// another device. The pending offer is cleared here as well, so an
    /// accept on a desk phone still releases it.
    async fn on_accepted(&self, jsep: Option<serde_json::Value>) {
        let started = {
            let mut state = self.store().write().await;
            state.stamp_activity();
            let offer = state.pending_offer.take();
            state.ringing = false;
            state.ringback = false;
            state.outbound_in_progress = false;

            match state.call.as_mut() {
                Some(call) if !call.accepted => {
                    call.accepted = true;
                    call.connect_time = Some(Utc::now());
                    Some((call.peer.clone(), call.direction))
                }
                Some(_) => None,
                None => match offer {
                    // Answered elsewhere (desk phone): adopt the call.
                    Some(offer) => {
                        let mut call = ActiveCall::incoming(offer.from);
                        call.accepted = true;
                        call.connect_time = Some(Utc::now());
                        let started = (call.peer.clone(), call.direction);
                        state.call = Some(call);
                        Some(started)
                    }
                    None => None,
                },
            }
        };

        if let Some(jsep) = jsep {
            if let Ok(channel) = self.require_channel().await {
                if let Err(e) = channel.apply_remote_description(jsep).await {
                    warn!("Applying answer description failed: {}", e);
                }
            }
        }

        if let Some((peer, direction)) = started {
            info!("Call with {} accepted", peer);
            self.emit(PhoneEvent::CallStarted { peer, direction });
        }
    }

    /// The call ended remotely. Desktop builds enforce a local hangup so
    /// the gateway side is torn down even when the remote leg vanished
    /// without one; mobile builds leave that to the remote leg.
    async fn on_hangup(&self, code: Option<u16>, reason: Option<String>) {
        let (had_any, had_share) = {
            let mut state = self.store().write().await;
            state.stamp_activity();
            let had_any = state.call.is_some()
                || state.pending_offer.is_some()
                || state.outbound_in_progress;
            state.call = None;
            state.pending_offer = None;
            state.ringing = false;
            state.ringback = false;
            state.muted = false;
            state.held = false;
            state.outbound_in_progress = false;
            state.ice_state = IceConnState::New;
            let had_share = state.screenshare_active;
            state.screenshare_active = false;
            (had_any, had_share)
        };
        if !had_any {
            return;
        }

        let reason_text = reason.or_else(|| code.map(|c| c.to_string()));
        info!("Call ended ({})", reason_text.as_deref().unwrap_or("hangup"));

        if had_share {
            self.detach_screenshare().await;
        }
        if self.config().user_agent_class == UserAgentClass::Desktop {
            if let Ok(channel) = self.require_channel().await {
                if let Err(e) = channel.hangup().await {
                    debug!("Local hangup enforcement failed: {}", e);
                }
            }
        }

        self.emit(PhoneEvent::CallEnded { reason: reason_text });
    }

    async fn on_remote_track_added(&self, kind: TrackKind, track_id: String) {
        {
            let mut state = self.store().write().await;
            state.stamp_activity();
            if !state.remote_tracks.contains(&track_id) {
                state.remote_tracks.push(track_id.clone());
            }
        }
        match kind {
            TrackKind::Audio => {
                debug!("Remote audio track {}; reapplying the output device", track_id);
                self.reapply_audio_output().await;
            }
            TrackKind::Video => {
                // Ask for a keyframe so the new track renders immediately.
                if let Ok(channel) = self.require_channel().await {
                    if let Err(e) = channel.request_keyframe().await {
                        debug!("Keyframe request failed: {}", e);
                    }
                }
            }
        }
    }

    /// The remote side wants a fresh keyframe. Forwarded on the active
    /// call; without one there is nothing encoding, so it only counts as
    /// gateway liveness.
    async fn on_keyframe_request(&self) {
        let has_call = {
            let mut state = self.store().write().await;
            state.stamp_activity();
            state.call.is_some()
        };
        if !has_call {
            debug!("Keyframe requested with no call up; ignoring");
            return;
        }
        if let Ok(channel) = self.require_channel().await {
            if let Err(e) = channel.request_keyframe().await {
                debug!("Forwarding keyframe request failed: {}", e);
            }
        }
    }

    /// The gateway destroyed the session. During a reload or after destroy
    /// this is the acknowledgement of our own teardown; otherwise the
    /// session died under us, the one being built included, which is the
    /// condition that raises the user-facing alert.
    async fn on_destroyed(&self) {
        let outcome = {
            let mut state = self.store().write().await;
            if state.phase == SessionPhase::Reloading || state.phase == SessionPhase::Destroyed {
                debug!("Session destroyed (voluntary)");
                None
            } else if state.session_id.is_none() && state.phase != SessionPhase::Connecting {
                // A repeat notice for a session already accounted as lost.
                debug!("Destroyed notice without a session; ignoring");
                None
            } else {
                warn!("Session destroyed by the gateway");
                let had_session = state.session_id.is_some();
                let had_call = state.call.is_some();
                let was_registered = state.registered;
                state.clear_session_scope();
                state.connection_stale = true;
                state.phase = SessionPhase::Degraded;
                // A build still working on this session must not publish it.
                state.invalidate_build();
                let raise = if state.alert.is_none() {
                    state.alert = Some(AlertKind::WebrtcDown);
                    true
                } else {
                    false
                };
                Some((had_session, had_call, was_registered, raise))
            }
        };
        let Some((had_session, had_call, was_registered, raise)) = outcome else {
            return;
        };

        self.disarm_safety_timer();
        // The handles point at a session that no longer exists. The pump is
        // this very task, so it is dropped rather than aborted; it ends
        // when the dead session's stream closes.
        self.drop_handles().await;
        if had_session {
            // A session that never committed is counted by the build that
            // abandons it.
            self.stats.write().await.sessions_destroyed += 1;
        }

        if had_call {
            self.emit(PhoneEvent::CallEnded {
                reason: Some("session-lost".into()),
            });
        }
        if was_registered {
            self.emit(PhoneEvent::Unregistered);
        }
        if raise {
            self.emit(PhoneEvent::AlertSet {
                alert: AlertKind::WebrtcDown,
            });
        }
    }

    /// Gateway-level error. During a build it fails the build; with a call
    /// up it ends the call; otherwise it is only logged.
    async fn on_gateway_error(&self, code: u16, reason: String) {
        warn!("Gateway error {}: {}", code, reason);

        let during_build = self.store().phase().await.build_in_flight();
        if during_build {
            let raise = {
                let mut state = self.store().write().await;
                state.phase = SessionPhase::Degraded;
                state.connection_stale = true;
                if state.alert.is_none() {
                    state.alert = Some(AlertKind::WebrtcDown);
                    true
                } else {
                    false
                }
            };
            self.disarm_safety_timer();
            if raise {
                self.emit(PhoneEvent::AlertSet {
                    alert: AlertKind::WebrtcDown,
                });
            }
            return;
        }

        let ended = {
            let mut state = self.store().write().await;
            if state.call.is_some() || state.outbound_in_progress {
                state.call = None;
                state.outbound_in_progress = false;
                state.ringback = false;
                state.ice_state = IceConnState::New;
                true
            } else {
                false
            }
        };
        if ended {
            self.emit(PhoneEvent::CallEnded {
                reason: Some(format!("error {}", code)),
            });
        }
    }
}
