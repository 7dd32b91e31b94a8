//! Supervisor lifecycle states and the transitions between them

use crate::error::{Result, SupervisorError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of a supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Uninitialized,
    Initializing,
    Starting,
    WaitingForReady,
    /// Up and, in containerized mode, monitored
    Running,
    Restarting,
    /// Running, but the last automatic restart failed; monitoring continues
    Degraded,
    Stopping,
    Stopped,
    Failed,
}

impl SupervisorState {
    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(self, to: SupervisorState) -> bool {
        use SupervisorState::*;

        matches!(
            (self, to),
            (Uninitialized, Initializing)
                | (Initializing | Stopped, Starting)
                | (Starting, WaitingForReady)
                | (WaitingForReady, Running)
                | (Running | Degraded, Restarting)
                | (Restarting, Running | Degraded)
                | (Degraded, Running)
                | (Running | Degraded | Restarting, Stopping)
                // Tear down whatever a failed launch or monitor left behind
                | (Failed, Stopping)
                | (Stopping, Stopped)
                | (Initializing | Starting | WaitingForReady | Restarting, Failed)
                // Restart budget exhausted by the monitor
                | (Running | Degraded, Failed)
        )
    }

    /// Whether the workload is expected to be serving
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SupervisorState::Running | SupervisorState::Restarting | SupervisorState::Degraded
        )
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SupervisorState::Uninitialized => "uninitialized",
            SupervisorState::Initializing => "initializing",
            SupervisorState::Starting => "starting",
            SupervisorState::WaitingForReady => "waiting for ready",
            SupervisorState::Running => "running",
            SupervisorState::Restarting => "restarting",
            SupervisorState::Degraded => "degraded",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
            SupervisorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Single owner of the current state; observers subscribe to changes
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<SupervisorState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SupervisorState::Uninitialized);
        Self { tx }
    }

    pub(crate) fn get(&self) -> SupervisorState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.tx.subscribe()
    }

    /// Move to `to`, rejecting illegal transitions. `action` names the caller for errors.
    pub(crate) fn transition(&self, to: SupervisorState, action: &'static str) -> Result<()> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(to) {
                debug!("Supervisor state: {} → {}", state, to);
                *state = to;
                true
            } else {
                outcome = Err(SupervisorError::InvalidState {
                    action,
                    state: *state,
                });
                false
            }
        });
        outcome
    }

    /// Transition only if currently in one of `from`; returns whether it happened
    pub(crate) fn transition_from(&self, from: &[SupervisorState], to: SupervisorState) -> bool {
        self.tx.send_if_modified(|state| {
            if from.contains(state) && state.can_transition_to(to) {
                debug!("Supervisor state: {} → {}", state, to);
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Record an unrecoverable failure
    pub(crate) fn fail(&self) {
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(SupervisorState::Failed) {
                debug!("Supervisor state: {} → failed", state);
                *state = SupervisorState::Failed;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SupervisorState::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Uninitialized,
            Initializing,
            Starting,
            WaitingForReady,
            Running,
            Restarting,
            Running,
            Stopping,
            Stopped,
            Starting,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} → {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_failed_reachability() {
        for from in [Initializing, Starting, WaitingForReady, Restarting, Degraded] {
            assert!(from.can_transition_to(Failed));
        }
        for from in [Uninitialized, Stopping, Stopped, Failed] {
            assert!(!from.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_failed_can_only_be_stopped() {
        assert!(Failed.can_transition_to(Stopping));
        for to in [Starting, Running, Restarting, Stopped] {
            assert!(!Failed.can_transition_to(to), "failed → {} should be rejected", to);
        }
    }

    #[test]
    fn test_active_states() {
        for state in [Running, Restarting, Degraded] {
            assert!(state.is_active());
        }
        for state in [Uninitialized, WaitingForReady, Stopping, Stopped, Failed] {
            assert!(!state.is_active());
        }
    }

    #[test]
    fn test_cell_rejects_illegal_transition() {
        let cell = StateCell::new();
        let err = cell.transition(Running, "wait for readiness").unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::InvalidState {
                state: Uninitialized,
                ..
            }
        ));
        assert_eq!(cell.get(), Uninitialized);
    }

    #[test]
    fn test_cell_notifies_subscribers() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        cell.transition(Initializing, "initialize").unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Initializing);

        assert!(!cell.transition_from(&[Running], Restarting));
        assert!(!rx.has_changed().unwrap());
    }
}
