//! Alert decisions
//!
//! Each alert kind runs a two-state debouncer: the first observation of a
//! triggering condition notifies, repeats stay silent, and a non-triggering
//! observation re-arms it. This module decides *when* to notify; delivery is
//! left to an [`AlertSink`].

use crate::error::NotificationError;
use crate::types::AlertKind;
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    #[default]
    Quiescent,
    Notified,
}

/// Outcome of one debouncer step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub state: AlertPhase,
    pub should_notify: bool,
}

/// Advance the debouncer. `should_notify` is true exactly on the
/// Quiescent → Notified transition.
pub fn decide(current_condition: bool, prior: AlertPhase) -> Decision {
    match (prior, current_condition) {
        (AlertPhase::Quiescent, true) => Decision {
            state: AlertPhase::Notified,
            should_notify: true,
        },
        (AlertPhase::Notified, true) => Decision {
            state: AlertPhase::Notified,
            should_notify: false,
        },
        (_, false) => Decision {
            state: AlertPhase::Quiescent,
            should_notify: false,
        },
    }
}

/// Debouncer phases for one monitoring session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertState {
    panic: AlertPhase,
    geofence_exit: AlertPhase,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, kind: AlertKind) -> AlertPhase {
        match kind {
            AlertKind::Panic => self.panic,
            AlertKind::GeofenceExit => self.geofence_exit,
        }
    }

    fn phase_mut(&mut self, kind: AlertKind) -> &mut AlertPhase {
        match kind {
            AlertKind::Panic => &mut self.panic,
            AlertKind::GeofenceExit => &mut self.geofence_exit,
        }
    }

    /// Feed one observation for `kind`.
    ///
    /// `None` means the condition is unknown (no model, no fix). The phase is
    /// left untouched: an unknown reading neither triggers nor clears an alert.
    pub fn observe(&mut self, kind: AlertKind, condition: Option<bool>) -> Decision {
        let phase = self.phase_mut(kind);
        match condition {
            Some(condition) => {
                let decision = decide(condition, *phase);
                *phase = decision.state;
                decision
            }
            None => Decision {
                state: *phase,
                should_notify: false,
            },
        }
    }
}

/// Delivery channel for alerts (email, push, dashboard banner)
pub trait AlertSink {
    fn notify(&mut self, kind: AlertKind, detail: &str) -> Result<(), NotificationError>;
}

/// Notification that was handed to a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatched {
    pub kind: AlertKind,
    pub detail: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Call the sink if `decision` asks for it.
///
/// A sink failure is logged and reported back; it never aborts the caller.
pub fn dispatch(
    sink: &mut dyn AlertSink,
    kind: AlertKind,
    decision: Decision,
    detail: &str,
) -> Option<Dispatched> {
    if !decision.should_notify {
        return None;
    }

    match sink.notify(kind, detail) {
        Ok(()) => {
            info!("{kind} alert sent: {detail}");
            Some(Dispatched {
                kind,
                detail: detail.to_string(),
                delivered: true,
                error: None,
            })
        }
        Err(e) => {
            warn!("{e}");
            Some(Dispatched {
                kind,
                detail: detail.to_string(),
                delivered: false,
                error: Some(e.to_string()),
            })
        }
    }
}

/// Sink that writes alerts to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&mut self, kind: AlertKind, detail: &str) -> Result<(), NotificationError> {
        warn!("ALERT [{kind}] {detail}");
        Ok(())
    }
}

/// Sink that records notifications in memory, optionally failing every call
#[derive(Debug, Default)]
pub struct MemorySink {
    pub sent: Vec<(AlertKind, String)>,
    pub fail_with: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose transport is down
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            sent: Vec::new(),
            fail_with: Some(reason.into()),
        }
    }
}

impl AlertSink for MemorySink {
    fn notify(&mut self, kind: AlertKind, detail: &str) -> Result<(), NotificationError> {
        if let Some(reason) = &self.fail_with {
            return Err(NotificationError::new(kind, reason.clone()));
        }
        self.sent.push((kind, detail.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_debounce_sequence() {
        let mut phase = AlertPhase::Quiescent;
        let mut notifications = Vec::new();
        for condition in [true, true, false, true] {
            let decision = decide(condition, phase);
            phase = decision.state;
            notifications.push(decision.should_notify);
        }

        assert_eq!(notifications, vec![true, false, false, true]);
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            decide(false, AlertPhase::Quiescent),
            Decision {
                state: AlertPhase::Quiescent,
                should_notify: false
            }
        );
        assert_eq!(
            decide(false, AlertPhase::Notified),
            Decision {
                state: AlertPhase::Quiescent,
                should_notify: false
            }
        );
        assert_eq!(decide(true, AlertPhase::Notified).state, AlertPhase::Notified);
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut state = AlertState::new();
        assert!(state.observe(AlertKind::Panic, Some(true)).should_notify);
        assert!(state.observe(AlertKind::GeofenceExit, Some(true)).should_notify);
        assert!(!state.observe(AlertKind::Panic, Some(true)).should_notify);

        state.observe(AlertKind::GeofenceExit, Some(false));
        assert_eq!(state.phase(AlertKind::Panic), AlertPhase::Notified);
        assert_eq!(state.phase(AlertKind::GeofenceExit), AlertPhase::Quiescent);
    }

    #[test]
    fn test_unknown_holds_phase() {
        let mut state = AlertState::new();
        state.observe(AlertKind::Panic, Some(true));

        let held = state.observe(AlertKind::Panic, None);
        assert_eq!(held.state, AlertPhase::Notified);
        assert!(!held.should_notify);

        // Unknown does not re-arm, so the sustained episode stays silent
        assert!(!state.observe(AlertKind::Panic, Some(true)).should_notify);
    }

    #[test]
    fn test_dispatch_only_on_transition() {
        let mut sink = MemorySink::new();
        let quiet = Decision {
            state: AlertPhase::Notified,
            should_notify: false,
        };
        assert!(dispatch(&mut sink, AlertKind::Panic, quiet, "x").is_none());

        let fire = decide(true, AlertPhase::Quiescent);
        let sent = dispatch(&mut sink, AlertKind::Panic, fire, "panic at 10:00").unwrap();
        assert!(sent.delivered);
        assert_eq!(sink.sent, vec![(AlertKind::Panic, "panic at 10:00".to_string())]);
    }

    #[test]
    fn test_dispatch_tolerates_sink_failure() {
        let mut sink = MemorySink::failing("smtp timeout");
        let fire = decide(true, AlertPhase::Quiescent);

        let sent = dispatch(&mut sink, AlertKind::GeofenceExit, fire, "left zone").unwrap();
        assert!(!sent.delivered);
        assert!(sent.error.unwrap().contains("smtp timeout"));
    }
}
