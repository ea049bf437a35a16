//! Event bus bridge.
//!
//! Connects the session core to the page-level event bus. Outward, every
//! lifecycle announcement is republished under its bus topic so page
//! components can react without holding a reference to the manager.
//! Inbound, a small set of command topics drives the manager: attach,
//! force-reload, transfer, the application socket reconnecting, and the
//! fullscreen toggles.
//!
//! Each direction runs on its own task; [`shutdown`](EventBusBridge::shutdown)
//! aborts them all.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wephone_infra_common::{BusMessage, EventBus};

use crate::events::topics;
use crate::manager::{ConnectOutcome, SessionManager};
use crate::types::StalenessEvidence;

/// Bridges the manager's events to and from the page event bus.
pub struct EventBusBridge {
    bus: EventBus,
    manager: Arc<SessionManager>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBusBridge {
    pub fn new(bus: EventBus, manager: Arc<SessionManager>) -> Self {
        Self {
            bus,
            manager,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Wires the outward pump and the inbound command handlers. Calling it
    /// again replaces the previous wiring.
    pub async fn start(&self) {
        let tasks = vec![
            self.spawn_outward_pump(),
            self.spawn_attach_handler().await,
            self.spawn_force_reload_handler().await,
            self.spawn_transfer_handler().await,
            self.spawn_socket_handler().await,
            self.spawn_fullscreen_handler(topics::FULLSCREEN_ON, true).await,
            self.spawn_fullscreen_handler(topics::FULLSCREEN_OFF, false).await,
        ];

        let mut slot = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for old in slot.drain(..) {
            old.abort();
        }
        *slot = tasks;
        info!("Event bus bridge started");
    }

    /// Aborts all bridge tasks.
    pub fn shutdown(&self) {
        let mut slot = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in slot.drain(..) {
            task.abort();
        }
        debug!("Event bus bridge stopped");
    }

    fn spawn_outward_pump(&self) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let mut events = self.manager.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let topic = event.topic();
                        if let Err(e) = bus.publish(topic, event.payload()).await {
                            warn!("Publishing {} failed: {}", topic, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Outward pump lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Outward pump ended");
        })
    }

    async fn spawn_attach_handler(&self) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let manager = self.manager.clone();
        let mut sub = self.bus.subscribe(topics::ATTACH).await;
        tokio::spawn(async move {
            while sub.recv().await.is_ok() {
                if let Err(e) = handle_attach(&bus, &manager).await {
                    warn!("Attach command failed: {:#}", e);
                }
            }
        })
    }

    async fn spawn_force_reload_handler(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let mut sub = self.bus.subscribe(topics::FORCE_RELOAD).await;
        tokio::spawn(async move {
            while sub.recv().await.is_ok() {
                info!("Force reload requested over the bus");
                match manager.reload(StalenessEvidence::force_reload()).await {
                    Ok(outcome) => debug!("Force reload finished: {:?}", outcome),
                    Err(e) => warn!("Force reload failed: {}", e),
                }
            }
        })
    }

    async fn spawn_transfer_handler(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let mut sub = self.bus.subscribe(topics::TRANSFER).await;
        tokio::spawn(async move {
            while let Ok(msg) = sub.recv().await {
                if let Err(e) = handle_transfer(&manager, &msg).await {
                    warn!("Transfer command failed: {:#}", e);
                }
            }
        })
    }

    async fn spawn_socket_handler(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let mut sub = self.bus.subscribe(topics::SOCKET_RECONNECTED).await;
        tokio::spawn(async move {
            while sub.recv().await.is_ok() {
                info!("Application socket reconnected; rechecking the session");
                match manager.reload(StalenessEvidence::connection_restored()).await {
                    Ok(outcome) => debug!("Post-reconnect reload finished: {:?}", outcome),
                    Err(e) => warn!("Post-reconnect reload failed: {}", e),
                }
            }
        })
    }

    async fn spawn_fullscreen_handler(&self, topic: &'static str, on: bool) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let mut sub = self.bus.subscribe(topic).await;
        tokio::spawn(async move {
            while sub.recv().await.is_ok() {
                debug!("Fullscreen {}", if on { "entered" } else { "left" });
                let payload = json!({ "fullscreen": on });
                if let Err(e) = bus.publish(topics::FULLSCREEN_CHANGED, payload).await {
                    warn!("Publishing fullscreen change failed: {}", e);
                }
            }
        })
    }
}

impl Drop for EventBusBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_attach(bus: &EventBus, manager: &Arc<SessionManager>) -> Result<()> {
    let outcome = manager.connect().await.context("connect")?;
    info!("Phone attached ({})", outcome_label(outcome));
    bus.publish(
        topics::ATTACHED,
        json!({
            "extension": manager.config().extension,
            "outcome": outcome_label(outcome),
        }),
    )
    .await
    .context("publish attached ack")?;
    Ok(())
}

async fn handle_transfer(manager: &Arc<SessionManager>, msg: &BusMessage) -> Result<()> {
    let target = msg
        .str_field("target")
        .ok_or_else(|| anyhow!("transfer command without a target"))?;
    manager.transfer(target).await.context("transfer")?;
    Ok(())
}

fn outcome_label(outcome: ConnectOutcome) -> &'static str {
    match outcome {
        ConnectOutcome::Connected => "connected",
        ConnectOutcome::Reused => "reused",
        ConnectOutcome::Rebuilt(_) => "rebuilt",
        ConnectOutcome::AlreadyInProgress => "in-progress",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::PhoneConfig;
    use crate::gateway::mock::MockGateway;

    fn manager_with_mock() -> (Arc<SessionManager>, Arc<MockGateway>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let gateway = Arc::new(MockGateway::new());
        let config = PhoneConfig::new("wss://gateway.example.com/ws", "1004", "pw")
            .with_proxy("pbx.example.com", 5060);
        let manager = SessionManager::builder(config, gateway.clone())
            .build()
            .unwrap();
        (manager, gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_command_connects_and_acks() {
        let bus = EventBus::new_default();
        let (manager, _gateway) = manager_with_mock();
        let bridge = EventBusBridge::new(bus.clone(), manager.clone());
        bridge.start().await;

        let mut attached = bus.subscribe(topics::ATTACHED).await;
        let mut registered = bus.subscribe(topics::REGISTERED).await;

        bus.publish(topics::ATTACH, json!({})).await.unwrap();

        let ack = attached.recv_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(ack.str_field("extension"), Some("1004"));
        assert_eq!(ack.str_field("outcome"), Some("connected"));

        // The mock acknowledges the registration, which flows out over the
        // bus through the outward pump.
        let reg = registered.recv_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reg.str_field("extension"), Some("1004"));

        bridge.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fullscreen_toggles_are_republished() {
        let bus = EventBus::new_default();
        let (manager, _gateway) = manager_with_mock();
        let bridge = EventBusBridge::new(bus.clone(), manager);
        bridge.start().await;

        let mut changed = bus.subscribe(topics::FULLSCREEN_CHANGED).await;

        bus.publish(topics::FULLSCREEN_ON, json!({})).await.unwrap();
        let msg = changed.recv_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(msg.payload["fullscreen"], true);

        bus.publish(topics::FULLSCREEN_OFF, json!({})).await.unwrap();
        let msg = changed.recv_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(msg.payload["fullscreen"], false);

        bridge.shutdown();
    }
}
