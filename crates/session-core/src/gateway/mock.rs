//! Scripted in-process gateway for tests and demos.
//!
//! Records every operation the lifecycle performs in a flat log and lets the
//! caller inject gateway events at will. Registration is acknowledged
//! automatically by default so the happy path needs no scripting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::config::RegistrationRequest;
use crate::error::{SessionError, SessionResult};
use crate::events::GatewayEvent;
use crate::gateway::{CreatedSession, GatewaySession, SignalingChannel, SignalingGateway};
use crate::types::SessionId;

/// One recorded gateway operation.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOp {
    CreateSession,
    AttachSignaling,
    Register,
    Unregister,
    Call(String),
    Answer,
    Decline(u16),
    Hangup,
    Hold(bool),
    Mute(bool),
    Dtmf(String),
    Transfer(String),
    ApplyRemoteDescription,
    RequestKeyframe,
    Detach,
    DestroySession,
}

struct Inner {
    ops: Mutex<Vec<MockOp>>,
    auto_register: AtomicBool,
    fail_create: AtomicBool,
    registration_failure: Mutex<Option<(u16, String)>>,
    answer_failure: Mutex<Option<String>>,
    hangup_failure: Mutex<Option<String>>,
    current_connected: Mutex<Option<Arc<AtomicBool>>>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<GatewayEvent>>>,
    sessions_created: AtomicU64,
    sessions_destroyed: AtomicU64,
    live: AtomicU64,
    max_live: AtomicU64,
}

impl Inner {
    fn record(&self, op: MockOp) {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).push(op);
    }
}

/// A scripted gateway.
///
/// Cloning is cheap and all clones share state; `set_connected` and
/// `push_event` act on the most recently created session.
#[derive(Clone)]
pub struct MockGateway {
    inner: Arc<Inner>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                ops: Mutex::new(Vec::new()),
                auto_register: AtomicBool::new(true),
                fail_create: AtomicBool::new(false),
                registration_failure: Mutex::new(None),
                answer_failure: Mutex::new(None),
                hangup_failure: Mutex::new(None),
                current_connected: Mutex::new(None),
                event_tx: Mutex::new(None),
                sessions_created: AtomicU64::new(0),
                sessions_destroyed: AtomicU64::new(0),
                live: AtomicU64::new(0),
                max_live: AtomicU64::new(0),
            }),
        }
    }

    /// Snapshot of the operation log.
    pub fn ops(&self) -> Vec<MockOp> {
        self.inner.ops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Empties the operation log.
    pub fn clear_ops(&self) {
        self.inner.ops.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Whether `register` is acknowledged with a `Registered` event
    /// automatically (default true).
    pub fn set_auto_register(&self, on: bool) {
        self.inner.auto_register.store(on, Ordering::SeqCst);
    }

    /// Makes `create_session` fail with a gateway error until turned off.
    pub fn set_fail_create(&self, on: bool) {
        self.inner.fail_create.store(on, Ordering::SeqCst);
    }

    /// Makes the next `register` answer with `RegistrationFailed`.
    pub fn fail_next_registration(&self, code: u16, reason: impl Into<String>) {
        *self
            .inner
            .registration_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some((code, reason.into()));
    }

    /// Makes the next `answer` fail with a negotiation error.
    pub fn fail_next_answer(&self, reason: impl Into<String>) {
        *self
            .inner
            .answer_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    /// Makes the next `hangup` fail with a gateway error.
    pub fn fail_next_hangup(&self, reason: impl Into<String>) {
        *self
            .inner
            .hangup_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    /// Flips connectivity of the most recently created session.
    pub fn set_connected(&self, connected: bool) {
        if let Some(flag) = self
            .inner
            .current_connected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            flag.store(connected, Ordering::SeqCst);
        }
    }

    /// Injects a gateway event into the most recently created session's
    /// stream.
    pub fn push_event(&self, event: GatewayEvent) {
        let guard = self.inner.event_tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    warn!("Mock gateway event dropped: stream consumer gone");
                }
            }
            None => warn!("Mock gateway event dropped: no session exists"),
        }
    }

    pub fn sessions_created(&self) -> u64 {
        self.inner.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_destroyed(&self) -> u64 {
        self.inner.sessions_destroyed.load(Ordering::SeqCst)
    }

    /// Sessions created but not yet destroyed.
    pub fn live_sessions(&self) -> u64 {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Highest number of sessions alive at any one moment.
    pub fn max_live_sessions(&self) -> u64 {
        self.inner.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingGateway for MockGateway {
    async fn create_session(&self) -> SessionResult<CreatedSession> {
        if self.inner.fail_create.load(Ordering::SeqCst) {
            return Err(SessionError::gateway("mock: create_session disabled"));
        }

        self.inner.record(MockOp::CreateSession);
        self.inner.sessions_created.fetch_add(1, Ordering::SeqCst);
        let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_live.fetch_max(live, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        *self.inner.event_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.clone());
        *self
            .inner
            .current_connected
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(connected.clone());

        let session = Arc::new(MockSession {
            id: SessionId::new(format!("mock-{}", Uuid::new_v4())),
            connected,
            destroyed: AtomicBool::new(false),
            events: tx,
            inner: self.inner.clone(),
        });

        Ok(CreatedSession { session, events: rx })
    }
}

struct MockSession {
    id: SessionId,
    connected: Arc<AtomicBool>,
    destroyed: AtomicBool,
    events: mpsc::UnboundedSender<GatewayEvent>,
    inner: Arc<Inner>,
}

#[async_trait]
impl GatewaySession for MockSession {
    fn id(&self) -> SessionId {
        self.id.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn attach_signaling(&self) -> SessionResult<Arc<dyn SignalingChannel>> {
        self.inner.record(MockOp::AttachSignaling);
        Ok(Arc::new(MockChannel {
            events: self.events.clone(),
            inner: self.inner.clone(),
        }))
    }

    async fn destroy(&self) -> SessionResult<()> {
        self.inner.record(MockOp::DestroySession);
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.inner.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
            self.inner.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockChannel {
    events: mpsc::UnboundedSender<GatewayEvent>,
    inner: Arc<Inner>,
}

impl MockChannel {
    fn push(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SignalingChannel for MockChannel {
    async fn register(&self, request: &RegistrationRequest) -> SessionResult<()> {
        self.inner.record(MockOp::Register);

        let failure = self
            .inner
            .registration_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some((code, reason)) = failure {
            self.push(GatewayEvent::RegistrationFailed { code, reason });
        } else if self.inner.auto_register.load(Ordering::SeqCst) {
            self.push(GatewayEvent::Registered {
                extension: request.extension.clone(),
            });
        }
        Ok(())
    }

    async fn unregister(&self) -> SessionResult<()> {
        self.inner.record(MockOp::Unregister);
        Ok(())
    }

    async fn call(&self, target: &str) -> SessionResult<()> {
        self.inner.record(MockOp::Call(target.to_string()));
        self.push(GatewayEvent::Calling);
        Ok(())
    }

    async fn answer(&self, _jsep: Value) -> SessionResult<()> {
        let failure = self
            .inner
            .answer_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(reason) = failure {
            return Err(SessionError::negotiation(reason));
        }
        self.inner.record(MockOp::Answer);
        Ok(())
    }

    async fn decline(&self, code: u16) -> SessionResult<()> {
        self.inner.record(MockOp::Decline(code));
        Ok(())
    }

    async fn hangup(&self) -> SessionResult<()> {
        let failure = self
            .inner
            .hangup_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(reason) = failure {
            return Err(SessionError::gateway(reason));
        }
        self.inner.record(MockOp::Hangup);
        Ok(())
    }

    async fn hold(&self, on: bool) -> SessionResult<()> {
        self.inner.record(MockOp::Hold(on));
        Ok(())
    }

    async fn mute(&self, on: bool) -> SessionResult<()> {
        self.inner.record(MockOp::Mute(on));
        Ok(())
    }

    async fn send_dtmf(&self, digits: &str) -> SessionResult<()> {
        self.inner.record(MockOp::Dtmf(digits.to_string()));
        Ok(())
    }

    async fn transfer(&self, target: &str) -> SessionResult<()> {
        self.inner.record(MockOp::Transfer(target.to_string()));
        Ok(())
    }

    async fn apply_remote_description(&self, _jsep: Value) -> SessionResult<()> {
        self.inner.record(MockOp::ApplyRemoteDescription);
        Ok(())
    }

    async fn request_keyframe(&self) -> SessionResult<()> {
        self.inner.record(MockOp::RequestKeyframe);
        Ok(())
    }

    async fn detach(&self) -> SessionResult<()> {
        self.inner.record(MockOp::Detach);
        Ok(())
    }
}
