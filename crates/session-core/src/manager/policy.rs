//! Pure decision logic for session reuse, reload vetoes, and staleness.
//!
//! Nothing in here touches the store or the gateway; the manager feeds these
//! functions snapshots and acts on the answers. That keeps every branch of
//! the lifecycle policy testable without a runtime.

use std::time::Duration;

use crate::types::{CallPresence, RebuildReason, StalenessEvidence, StalenessTrigger, VetoReason};

/// Decides whether the existing session can be reused.
///
/// Returns `None` when the session is healthy enough to keep: transport
/// connected, extension registered, and either recent gateway activity or a
/// call the user would not want interrupted. Otherwise returns the reason a
/// rebuild is required.
pub(crate) fn evaluate_reuse(
    connected: bool,
    registered: bool,
    inactivity: Duration,
    presence: CallPresence,
    long_inactivity: Duration,
) -> Option<RebuildReason> {
    if !connected {
        return Some(RebuildReason::NotConnected);
    }
    if !registered {
        return Some(RebuildReason::NotRegistered);
    }
    if inactivity >= long_inactivity && !presence.any() {
        return Some(RebuildReason::LongInactivity);
    }
    None
}

/// Decides whether call state must block a voluntary reload.
///
/// An unanswered incoming offer always wins: the caller is a human waiting
/// for an answer, and no amount of staleness justifies dropping them. An
/// established call wins only while the session is younger than the long
/// inactivity threshold; past that the connection is presumed dead anyway
/// and the reload proceeds.
pub(crate) fn check_veto(
    presence: CallPresence,
    inactivity: Option<Duration>,
    long_inactivity: Duration,
) -> Option<VetoReason> {
    if presence.incoming {
        return Some(VetoReason::PendingIncomingCall);
    }
    if presence.active && inactivity.map_or(true, |d| d < long_inactivity) {
        return Some(VetoReason::ActiveCall);
    }
    None
}

/// Decides whether freshly gathered evidence justifies a reload attempt.
///
/// Explicit triggers (a force-reload request, the signaling socket coming
/// back) always do. Passive evidence needs weight: the page was hidden for
/// at least the short threshold, the tab was frozen, or the transport was
/// already flagged stale.
pub(crate) fn staleness_warrants_reload(
    evidence: &StalenessEvidence,
    short_inactivity: Duration,
) -> bool {
    match evidence.trigger {
        StalenessTrigger::ForceReload | StalenessTrigger::ConnectionRestored => true,
        StalenessTrigger::VisibilityRestored | StalenessTrigger::PageResumed => {
            evidence.hidden_for.is_some_and(|d| d >= short_inactivity)
                || evidence.was_frozen
                || evidence.connection_stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_secs(3 * 60);
    const LONG: Duration = Duration::from_secs(30 * 60);

    fn idle() -> CallPresence {
        CallPresence {
            incoming: false,
            active: false,
        }
    }

    #[test]
    fn test_reuse_requires_connected_and_registered() {
        assert_eq!(
            evaluate_reuse(false, true, Duration::ZERO, idle(), LONG),
            Some(RebuildReason::NotConnected)
        );
        assert_eq!(
            evaluate_reuse(true, false, Duration::ZERO, idle(), LONG),
            Some(RebuildReason::NotRegistered)
        );
        assert_eq!(evaluate_reuse(true, true, Duration::ZERO, idle(), LONG), None);
    }

    #[test]
    fn test_long_inactivity_forces_rebuild_unless_call_present() {
        let stale = LONG + Duration::from_secs(1);
        assert_eq!(
            evaluate_reuse(true, true, stale, idle(), LONG),
            Some(RebuildReason::LongInactivity)
        );

        // A call in progress keeps even a long-idle session alive.
        let on_call = CallPresence {
            incoming: false,
            active: true,
        };
        assert_eq!(evaluate_reuse(true, true, stale, on_call, LONG), None);
    }

    #[test]
    fn test_pending_offer_always_vetoes() {
        let ringing = CallPresence {
            incoming: true,
            active: false,
        };
        assert_eq!(
            check_veto(ringing, Some(LONG * 2), LONG),
            Some(VetoReason::PendingIncomingCall)
        );
        assert_eq!(
            check_veto(ringing, None, LONG),
            Some(VetoReason::PendingIncomingCall)
        );
    }

    #[test]
    fn test_active_call_veto_expires_past_long_threshold() {
        let on_call = CallPresence {
            incoming: false,
            active: true,
        };
        assert_eq!(
            check_veto(on_call, Some(Duration::from_secs(60)), LONG),
            Some(VetoReason::ActiveCall)
        );
        // Unknown session age is treated as young.
        assert_eq!(check_veto(on_call, None, LONG), Some(VetoReason::ActiveCall));
        // Past the long threshold the call no longer blocks the reload.
        assert_eq!(check_veto(on_call, Some(LONG), LONG), None);
    }

    #[test]
    fn test_staleness_triggers() {
        let explicit = StalenessEvidence::force_reload();
        assert!(staleness_warrants_reload(&explicit, SHORT));

        let restored = StalenessEvidence::connection_restored();
        assert!(staleness_warrants_reload(&restored, SHORT));

        let briefly_hidden = StalenessEvidence {
            trigger: StalenessTrigger::VisibilityRestored,
            hidden_for: Some(Duration::from_secs(5)),
            was_frozen: false,
            connection_stale: false,
        };
        assert!(!staleness_warrants_reload(&briefly_hidden, SHORT));

        let long_hidden = StalenessEvidence {
            hidden_for: Some(SHORT),
            ..briefly_hidden.clone()
        };
        assert!(staleness_warrants_reload(&long_hidden, SHORT));

        let frozen = StalenessEvidence {
            was_frozen: true,
            ..briefly_hidden.clone()
        };
        assert!(staleness_warrants_reload(&frozen, SHORT));

        let stale_transport = StalenessEvidence {
            connection_stale: true,
            ..briefly_hidden
        };
        assert!(staleness_warrants_reload(&stale_transport, SHORT));
    }
}
