//! Source selection state machine
//!
//! ```text
//! Idle ──select S──▶ Transitioning(S) ──confirm S──▶ Active(S, phase)
//!   ▲                      │  ▲                          │
//!   │                      │  └──────select T────────────┘
//!   └──── none reported ───┴──────────────────────────────┘
//! ```
//!
//! The displayed source only changes on confirmation; a command merely sets
//! the pending target.

use std::time::Instant;

use source_api::{LifecyclePhase, SourceId};

/// Observable state of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Transitioning { from: SourceId, target: SourceId },
    Active { source: SourceId, phase: LifecyclePhase },
}

/// A switch that has been requested but not yet confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSwitch {
    pub target: SourceId,
    pub requested_at: Instant,
}

/// Result of a selection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Already active (or already the pending target); nothing to send
    NoOp,
    Started { target: SourceId },
    /// Replaced an unconfirmed switch to `previous`
    Superseded { previous: SourceId, target: SourceId },
}

/// Result of a confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub previous: SourceId,
    pub source: SourceId,
    /// The displayed source changed
    pub switched: bool,
}

#[derive(Debug, Default)]
pub struct SourceMachine {
    displayed: SourceId,
    phase: LifecyclePhase,
    pending: Option<PendingSwitch>,
}

impl SourceMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SourceState {
        match (self.pending, self.displayed) {
            (Some(pending), from) => SourceState::Transitioning {
                from,
                target: pending.target,
            },
            (None, SourceId::None) => SourceState::Idle,
            (None, source) => SourceState::Active {
                source,
                phase: self.phase,
            },
        }
    }

    /// Source whose metadata is shown
    pub fn displayed(&self) -> SourceId {
        self.displayed
    }

    /// Source the user asked for: the pending target, else the displayed one
    pub fn requested(&self) -> SourceId {
        self.pending.map_or(self.displayed, |p| p.target)
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn pending(&self) -> Option<PendingSwitch> {
        self.pending
    }

    pub fn is_transitioning(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether events tagged with `source` may touch state
    ///
    /// Only the displayed source and the transition target qualify.
    pub fn accepts(&self, source: SourceId) -> bool {
        !source.is_none()
            && (source == self.displayed || self.pending.is_some_and(|p| p.target == source))
    }

    /// Handle a "select source" command
    pub fn request(&mut self, target: SourceId, now: Instant) -> SelectOutcome {
        match self.pending {
            None if target == self.displayed => SelectOutcome::NoOp,
            Some(pending) if pending.target == target => SelectOutcome::NoOp,
            None => {
                self.pending = Some(PendingSwitch {
                    target,
                    requested_at: now,
                });
                SelectOutcome::Started { target }
            }
            Some(pending) => {
                self.pending = Some(PendingSwitch {
                    target,
                    requested_at: now,
                });
                SelectOutcome::Superseded {
                    previous: pending.target,
                    target,
                }
            }
        }
    }

    /// Backend confirmed `source` as active
    pub fn confirm(&mut self, source: SourceId, phase: LifecyclePhase) -> Confirmation {
        let previous = self.displayed;
        self.displayed = source;
        self.phase = phase;
        self.pending = None;
        Confirmation {
            previous,
            source,
            switched: previous != source,
        }
    }

    /// Backend reported no active source
    ///
    /// A pending switch to a real source survives; the backend may report
    /// idle on its way there.
    pub fn clear(&mut self) -> SourceId {
        let previous = self.displayed;
        self.displayed = SourceId::None;
        self.phase = LifecyclePhase::Inactive;
        if self.pending.is_some_and(|p| p.target.is_none()) {
            self.pending = None;
        }
        previous
    }

    /// Update the displayed source's phase; ignored for any other source
    pub fn set_phase(&mut self, source: SourceId, phase: LifecyclePhase) -> bool {
        if source != self.displayed || source.is_none() || self.phase == phase {
            return false;
        }
        self.phase = phase;
        true
    }

    /// Abandon the pending switch, returning its target
    pub fn abort_pending(&mut self) -> Option<SourceId> {
        self.pending.take().map(|p| p.target)
    }

    /// Abandon the pending switch only if it still targets `target`
    pub fn abort_if_target(&mut self, target: SourceId) -> bool {
        if self.pending.is_some_and(|p| p.target == target) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(source: SourceId, phase: LifecyclePhase) -> SourceMachine {
        let mut machine = SourceMachine::new();
        machine.confirm(source, phase);
        machine
    }

    #[test]
    fn test_starts_idle() {
        let machine = SourceMachine::new();
        assert_eq!(machine.state(), SourceState::Idle);
        assert!(!machine.accepts(SourceId::None));
        assert!(!machine.accepts(SourceId::Bluetooth));
    }

    #[test]
    fn test_reselecting_active_source_is_noop() {
        let mut machine = active(SourceId::StreamClient, LifecyclePhase::Connected);
        assert_eq!(
            machine.request(SourceId::StreamClient, Instant::now()),
            SelectOutcome::NoOp
        );
        assert!(!machine.is_transitioning());
    }

    #[test]
    fn test_select_keeps_displayed_until_confirmed() {
        let mut machine = active(SourceId::StreamClient, LifecyclePhase::Connected);
        let outcome = machine.request(SourceId::Bluetooth, Instant::now());

        assert_eq!(
            outcome,
            SelectOutcome::Started {
                target: SourceId::Bluetooth
            }
        );
        assert_eq!(machine.displayed(), SourceId::StreamClient);
        assert_eq!(machine.requested(), SourceId::Bluetooth);
        assert!(machine.accepts(SourceId::StreamClient));
        assert!(machine.accepts(SourceId::Bluetooth));

        let confirmation = machine.confirm(SourceId::Bluetooth, LifecyclePhase::Ready);
        assert!(confirmation.switched);
        assert_eq!(
            machine.state(),
            SourceState::Active {
                source: SourceId::Bluetooth,
                phase: LifecyclePhase::Ready
            }
        );
        assert!(!machine.accepts(SourceId::StreamClient));
    }

    #[test]
    fn test_new_request_supersedes_pending_target() {
        let mut machine = active(SourceId::StreamClient, LifecyclePhase::Connected);
        machine.request(SourceId::Bluetooth, Instant::now());
        let outcome = machine.request(SourceId::WebRadio, Instant::now());

        assert_eq!(
            outcome,
            SelectOutcome::Superseded {
                previous: SourceId::Bluetooth,
                target: SourceId::WebRadio
            }
        );
        assert!(!machine.accepts(SourceId::Bluetooth));
        assert!(machine.accepts(SourceId::WebRadio));
    }

    #[test]
    fn test_clear_moves_to_idle() {
        let mut machine = active(SourceId::WebRadio, LifecyclePhase::Connected);
        machine.request(SourceId::None, Instant::now());

        assert_eq!(machine.clear(), SourceId::WebRadio);
        assert_eq!(machine.state(), SourceState::Idle);
        assert_eq!(machine.phase(), LifecyclePhase::Inactive);
    }

    #[test]
    fn test_clear_keeps_switch_to_real_source() {
        let mut machine = active(SourceId::WebRadio, LifecyclePhase::Connected);
        machine.request(SourceId::Bluetooth, Instant::now());
        machine.clear();

        assert_eq!(
            machine.state(),
            SourceState::Transitioning {
                from: SourceId::None,
                target: SourceId::Bluetooth
            }
        );
    }

    #[test]
    fn test_phase_only_changes_for_displayed_source() {
        let mut machine = active(SourceId::Bluetooth, LifecyclePhase::Ready);
        assert!(!machine.set_phase(SourceId::StreamClient, LifecyclePhase::Connected));
        assert!(machine.set_phase(SourceId::Bluetooth, LifecyclePhase::Connected));
        assert_eq!(machine.phase(), LifecyclePhase::Connected);
    }

    #[test]
    fn test_abort_if_target() {
        let mut machine = active(SourceId::Bluetooth, LifecyclePhase::Ready);
        machine.request(SourceId::WebRadio, Instant::now());

        assert!(!machine.abort_if_target(SourceId::StreamClient));
        assert!(machine.is_transitioning());
        assert!(machine.abort_if_target(SourceId::WebRadio));
        assert!(!machine.is_transitioning());
    }
}
