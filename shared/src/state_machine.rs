//! Flag State Machine
//!
//! Defines the set → reboot → validate chain for device configuration flags.
//! The chain is linear: every step changes device state irreversibly, so a
//! failed step is terminal and the caller retries the whole chain.

use crate::{DeviceFlagState, FlagTarget};

/// Phases of applying a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagPhase {
    /// Set-flag command about to be issued
    Setting,
    /// Reboot command about to be issued
    Rebooting,
    /// Waiting for the flag read-back
    Validating,
    /// Flag read back with the expected value
    Succeeded,
    /// A step failed; terminal
    Failed,
}

impl FlagPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlagPhase::Succeeded | FlagPhase::Failed)
    }
}

/// Events reported by the flag controller as it drives the chain
#[derive(Debug, Clone, PartialEq)]
pub enum FlagEvent {
    /// Device accepted the set-flag command
    SetAccepted,
    /// Set-flag command failed
    SetRejected { reason: String },
    /// Device accepted the reboot command (not "device back online")
    RebootAccepted,
    /// Reboot command failed
    RebootRejected { reason: String },
    /// Flag value read back from the device
    Observed(DeviceFlagState),
    /// The read-back command itself kept failing
    ReadFailed { reason: String },
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and the phase changed
    Success(FlagPhase),
    /// Event does not apply in the current phase
    Invalid { from: FlagPhase, event: FlagEvent },
    /// The chain ended in `Failed`
    Failed { from: FlagPhase, reason: String },
}

/// Per-target flag state machine
#[derive(Debug)]
pub struct FlagStateMachine {
    target: FlagTarget,
    phase: FlagPhase,
}

impl FlagStateMachine {
    /// Create a new state machine in the `Setting` phase
    pub fn new(target: FlagTarget) -> Self {
        Self {
            target,
            phase: FlagPhase::Setting,
        }
    }

    pub fn target(&self) -> FlagTarget {
        self.target
    }

    /// Get current phase
    pub fn phase(&self) -> FlagPhase {
        self.phase
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: FlagEvent) -> TransitionResult {
        use FlagEvent::*;
        use FlagPhase::*;

        let from = self.phase;
        match (from, event) {
            (Setting, SetAccepted) => self.advance(Rebooting),
            (Setting, SetRejected { reason }) => self.fail(from, reason),

            (Rebooting, RebootAccepted) => self.advance(Validating),
            (Rebooting, RebootRejected { reason }) => self.fail(from, reason),

            (Validating, Observed(state)) if state == self.target.expected_state() => {
                self.advance(Succeeded)
            }
            (Validating, Observed(state)) => {
                let reason = format!("expected {}, but got {}", self.target.expected_state(), state);
                self.fail(from, reason)
            }
            (Validating, ReadFailed { reason }) => self.fail(from, reason),

            (_, event) => TransitionResult::Invalid { from, event },
        }
    }

    fn advance(&mut self, to: FlagPhase) -> TransitionResult {
        debug_assert!(is_valid_transition(self.phase, to));
        self.phase = to;
        TransitionResult::Success(to)
    }

    fn fail(&mut self, from: FlagPhase, reason: String) -> TransitionResult {
        debug_assert!(is_valid_transition(from, FlagPhase::Failed));
        self.phase = FlagPhase::Failed;
        TransitionResult::Failed { from, reason }
    }
}

/// Check if a phase change is part of the chain
pub fn is_valid_transition(from: FlagPhase, to: FlagPhase) -> bool {
    use FlagPhase::*;

    match (from, to) {
        (Setting, Rebooting) => true,
        (Rebooting, Validating) => true,
        (Validating, Succeeded) => true,

        // Any non-terminal step can fail
        (Setting | Rebooting | Validating, Failed) => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_phase() {
        let fsm = FlagStateMachine::new(FlagTarget::Zero);
        assert_eq!(fsm.phase(), FlagPhase::Setting);
        assert!(!fsm.phase().is_terminal());
    }

    #[test]
    fn test_full_chain() {
        let mut fsm = FlagStateMachine::new(FlagTarget::Hex440);

        let result = fsm.process_event(FlagEvent::SetAccepted);
        assert!(matches!(result, TransitionResult::Success(FlagPhase::Rebooting)));

        let result = fsm.process_event(FlagEvent::RebootAccepted);
        assert!(matches!(result, TransitionResult::Success(FlagPhase::Validating)));

        let result = fsm.process_event(FlagEvent::Observed(DeviceFlagState::Hex440));
        assert!(matches!(result, TransitionResult::Success(FlagPhase::Succeeded)));
        assert!(fsm.phase().is_terminal());
    }

    #[test]
    fn test_set_rejection_is_terminal() {
        let mut fsm = FlagStateMachine::new(FlagTarget::Zero);

        let result = fsm.process_event(FlagEvent::SetRejected {
            reason: "idme: permission denied".into(),
        });
        assert!(matches!(
            result,
            TransitionResult::Failed { from: FlagPhase::Setting, .. }
        ));
        assert_eq!(fsm.phase(), FlagPhase::Failed);

        // Nothing moves a failed chain
        let result = fsm.process_event(FlagEvent::RebootAccepted);
        assert!(matches!(result, TransitionResult::Invalid { from: FlagPhase::Failed, .. }));
    }

    #[test]
    fn test_hex440_observed_for_zero_target_fails() {
        let mut fsm = FlagStateMachine::new(FlagTarget::Zero);
        fsm.process_event(FlagEvent::SetAccepted);
        fsm.process_event(FlagEvent::RebootAccepted);

        let result = fsm.process_event(FlagEvent::Observed(DeviceFlagState::Hex440));
        match result {
            TransitionResult::Failed { from, reason } => {
                assert_eq!(from, FlagPhase::Validating);
                assert!(reason.contains("0x440"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_read_back_is_terminal() {
        let mut fsm = FlagStateMachine::new(FlagTarget::Zero);
        fsm.process_event(FlagEvent::SetAccepted);
        fsm.process_event(FlagEvent::RebootAccepted);

        let result = fsm.process_event(FlagEvent::ReadFailed {
            reason: "error: closed".into(),
        });
        assert!(matches!(
            result,
            TransitionResult::Failed { from: FlagPhase::Validating, ref reason } if reason == "error: closed"
        ));
        assert_eq!(fsm.phase(), FlagPhase::Failed);
    }

    #[test]
    fn test_out_of_order_event() {
        let mut fsm = FlagStateMachine::new(FlagTarget::Zero);

        // Can't validate before the set and reboot went through
        let result = fsm.process_event(FlagEvent::Observed(DeviceFlagState::Zero));
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.phase(), FlagPhase::Setting);
    }

    #[test]
    fn test_transition_table() {
        assert!(is_valid_transition(FlagPhase::Setting, FlagPhase::Rebooting));
        assert!(is_valid_transition(FlagPhase::Validating, FlagPhase::Failed));
        assert!(!is_valid_transition(FlagPhase::Setting, FlagPhase::Succeeded));
        assert!(!is_valid_transition(FlagPhase::Failed, FlagPhase::Setting));
    }
}
