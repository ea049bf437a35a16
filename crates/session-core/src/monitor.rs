//! Activity and visibility monitor.
//!
//! Translates page lifecycle signals from the host (visibility changes,
//! freeze and resume, network loss and recovery) into staleness evidence,
//! and drives the periodic health check. The monitor gathers evidence
//! only; whether a rebuild actually happens is decided by the manager,
//! which also owns the call-preservation veto.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::SessionManager;
use crate::types::{StalenessEvidence, StalenessTrigger};

/// Page lifecycle signals fed by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    /// The page became hidden (tab switched, window minimized)
    Hidden,
    /// The page became visible again
    Visible,
    /// The host froze the page to reclaim resources
    Frozen,
    /// The host resumed a frozen page
    Resumed,
    /// Network connectivity reported restored
    Online,
    /// Network connectivity reported lost
    Offline,
}

/// Tracks page activity and schedules the health check.
pub struct ActivityMonitor {
    manager: Arc<SessionManager>,
    hidden_at: Mutex<Option<tokio::time::Instant>>,
    was_frozen: AtomicBool,
    offline: AtomicBool,
    health: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityMonitor {
    pub fn new(manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            hidden_at: Mutex::new(None),
            was_frozen: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            health: Mutex::new(None),
        })
    }

    /// Feeds one page signal into the monitor.
    pub async fn on_signal(&self, signal: PageSignal) {
        match signal {
            PageSignal::Hidden => {
                debug!("Page hidden");
                let mut hidden = self.hidden_at.lock().unwrap_or_else(|e| e.into_inner());
                if hidden.is_none() {
                    *hidden = Some(tokio::time::Instant::now());
                }
            }
            PageSignal::Frozen => {
                debug!("Page frozen");
                self.was_frozen.store(true, Ordering::SeqCst);
                // A freeze implies the page was hidden first; hosts do not
                // always deliver the hidden signal before freezing.
                let mut hidden = self.hidden_at.lock().unwrap_or_else(|e| e.into_inner());
                if hidden.is_none() {
                    *hidden = Some(tokio::time::Instant::now());
                }
            }
            PageSignal::Visible => {
                self.evaluate(StalenessTrigger::VisibilityRestored).await;
            }
            PageSignal::Resumed => {
                self.evaluate(StalenessTrigger::PageResumed).await;
            }
            PageSignal::Offline => {
                warn!("Network offline");
                self.offline.store(true, Ordering::SeqCst);
                self.manager.mark_connection_stale().await;
            }
            PageSignal::Online => {
                if self.offline.swap(false, Ordering::SeqCst) {
                    info!("Network back online");
                    match self.manager.reload(StalenessEvidence::connection_restored()).await {
                        Ok(outcome) => debug!("Post-online reload: {:?}", outcome),
                        Err(e) => warn!("Post-online reload failed: {}", e),
                    }
                }
            }
        }
    }

    /// Bundles the accumulated evidence and hands it to the manager.
    async fn evaluate(&self, trigger: StalenessTrigger) {
        let hidden_for = {
            let mut hidden = self.hidden_at.lock().unwrap_or_else(|e| e.into_inner());
            hidden.take().map(|since| since.elapsed())
        };
        let was_frozen = self.was_frozen.swap(false, Ordering::SeqCst);

        let evidence = StalenessEvidence {
            hidden_for,
            was_frozen,
            connection_stale: false,
            trigger,
        };
        debug!(
            "Staleness evaluation: trigger {}, hidden {:?}, frozen {}",
            trigger.as_str(),
            hidden_for,
            was_frozen
        );

        match self.manager.reload(evidence).await {
            Ok(outcome) => debug!("Reload evaluation finished: {:?}", outcome),
            Err(e) => warn!("Reload failed: {}", e),
        }
    }

    /// Starts the periodic health loop.
    ///
    /// Each period is jittered by up to ten percent either way so a page
    /// full of widgets does not hit the gateway in lockstep.
    pub fn start_health_loop(&self) {
        let manager = self.manager.clone();
        let base = manager.config().health_interval;
        let handle = tokio::spawn(async move {
            loop {
                let factor: f64 = rand::thread_rng().gen_range(0.9..=1.1);
                tokio::time::sleep(base.mul_f64(factor)).await;
                manager.health_tick().await;
            }
        });

        let mut slot = self.health.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
        debug!("Health loop started (period {:?} +/-10%)", base);
    }

    /// Stops the health loop.
    pub fn stop(&self) {
        let handle = self.health.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Health loop stopped");
        }
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhoneConfig;
    use crate::gateway::mock::MockGateway;

    fn manager() -> Arc<SessionManager> {
        let config = PhoneConfig::new("wss://gateway.example.com/ws", "1004", "pw")
            .with_proxy("pbx.example.com", 5060);
        SessionManager::builder(config, Arc::new(MockGateway::new()))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_span_is_measured_once() {
        let monitor = ActivityMonitor::new(manager());

        monitor.on_signal(PageSignal::Hidden).await;
        tokio::time::advance(std::time::Duration::from_secs(10)).await;
        // A second hidden signal does not restart the clock.
        monitor.on_signal(PageSignal::Hidden).await;
        tokio::time::advance(std::time::Duration::from_secs(10)).await;

        let hidden = monitor
            .hidden_at
            .lock()
            .unwrap()
            .map(|since| since.elapsed());
        assert_eq!(hidden, Some(std::time::Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_frozen_flag_consumed_by_evaluation() {
        let monitor = ActivityMonitor::new(manager());

        monitor.on_signal(PageSignal::Frozen).await;
        assert!(monitor.was_frozen.load(Ordering::SeqCst));

        // Resume evaluates (manager is idle, so nothing to reload) and
        // consumes the flag.
        monitor.on_signal(PageSignal::Resumed).await;
        assert!(!monitor.was_frozen.load(Ordering::SeqCst));
        assert!(monitor.hidden_at.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_online_only_reacts_after_offline() {
        let monitor = ActivityMonitor::new(manager());

        // Online without a preceding offline is ignored.
        monitor.on_signal(PageSignal::Online).await;
        assert!(!monitor.offline.load(Ordering::SeqCst));

        monitor.on_signal(PageSignal::Offline).await;
        assert!(monitor.offline.load(Ordering::SeqCst));
        monitor.on_signal(PageSignal::Online).await;
        assert!(!monitor.offline.load(Ordering::SeqCst));
    }
}
