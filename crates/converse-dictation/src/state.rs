//! Dictation phase machine with thread-safe transitions.
//!
//! Valid transitions:
//! - Idle -> Listening (user starts dictation)
//! - Stopped -> Listening (user starts again)
//! - Listening -> AutoRestarting (backend ended an utterance on its own)
//! - AutoRestarting -> Listening (backend re-started)
//! - Listening -> Stopped, AutoRestarting -> Stopped (user stop, trigger phrase, permission error)
//! - Stopped -> Idle (session discarded)

use std::fmt;
use std::sync::{Arc, Mutex};

use converse_core::error::ConverseError;

/// Operational phase of the dictation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DictationPhase {
    /// No dictation session exists.
    Idle,
    /// The speech backend is running and delivering transcripts.
    Listening,
    /// The backend ended an utterance; a re-start is scheduled.
    AutoRestarting,
    /// Dictation was stopped and will not re-start on its own.
    Stopped,
}

impl fmt::Display for DictationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictationPhase::Idle => write!(f, "Idle"),
            DictationPhase::Listening => write!(f, "Listening"),
            DictationPhase::AutoRestarting => write!(f, "AutoRestarting"),
            DictationPhase::Stopped => write!(f, "Stopped"),
        }
    }
}

impl DictationPhase {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &DictationPhase) -> bool {
        matches!(
            (self, target),
            (DictationPhase::Idle, DictationPhase::Listening)
                | (DictationPhase::Stopped, DictationPhase::Listening)
                | (DictationPhase::Listening, DictationPhase::AutoRestarting)
                | (DictationPhase::AutoRestarting, DictationPhase::Listening)
                | (DictationPhase::Listening, DictationPhase::Stopped)
                | (DictationPhase::AutoRestarting, DictationPhase::Stopped)
                | (DictationPhase::Stopped, DictationPhase::Idle)
        )
    }

    /// Whether recognition is running or about to run again.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DictationPhase::Listening | DictationPhase::AutoRestarting
        )
    }
}

/// Thread-safe state machine for dictation phase transitions.
///
/// Wraps `DictationPhase` in an `Arc<Mutex<>>` so that backend callbacks and
/// user actions observe the same phase. Every transition is validated before
/// it is applied.
#[derive(Debug, Clone)]
pub struct StateMachine {
    phase: Arc<Mutex<DictationPhase>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine initialized to `Idle`.
    pub fn new() -> Self {
        Self {
            phase: Arc::new(Mutex::new(DictationPhase::Idle)),
        }
    }

    /// Returns the current phase.
    pub fn current(&self) -> DictationPhase {
        *self.phase.lock().expect("phase mutex poisoned")
    }

    /// Attempt to transition to the target phase.
    ///
    /// Returns a `ConverseError::Dictation` if the transition is not allowed
    /// from the current phase.
    pub fn transition(&self, target: DictationPhase) -> Result<(), ConverseError> {
        let mut phase = self.phase.lock().expect("phase mutex poisoned");
        if phase.can_transition_to(&target) {
            tracing::debug!("Dictation phase: {} -> {}", *phase, target);
            *phase = target;
            Ok(())
        } else {
            Err(ConverseError::Dictation(format!(
                "Invalid phase transition: {} -> {}",
                *phase, target
            )))
        }
    }

    /// Transition only if the current phase is one of `from`.
    ///
    /// Returns whether the transition happened. Used by callbacks that may
    /// race a user action that already moved the phase on.
    pub fn transition_from(&self, from: &[DictationPhase], target: DictationPhase) -> bool {
        let mut phase = self.phase.lock().expect("phase mutex poisoned");
        if from.contains(&*phase) && phase.can_transition_to(&target) {
            tracing::debug!("Dictation phase: {} -> {}", *phase, target);
            *phase = target;
            true
        } else {
            false
        }
    }

    /// Force the state machine back to Idle (used for error recovery).
    pub fn reset(&self) {
        let mut phase = self.phase.lock().expect("phase mutex poisoned");
        tracing::warn!("Dictation phase reset to Idle from {}", *phase);
        *phase = DictationPhase::Idle;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(DictationPhase::Idle.to_string(), "Idle");
        assert_eq!(DictationPhase::Listening.to_string(), "Listening");
        assert_eq!(DictationPhase::AutoRestarting.to_string(), "AutoRestarting");
        assert_eq!(DictationPhase::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_valid_transitions() {
        use DictationPhase::*;
        assert!(Idle.can_transition_to(&Listening));
        assert!(Stopped.can_transition_to(&Listening));
        assert!(Listening.can_transition_to(&AutoRestarting));
        assert!(AutoRestarting.can_transition_to(&Listening));
        assert!(Listening.can_transition_to(&Stopped));
        assert!(AutoRestarting.can_transition_to(&Stopped));
        assert!(Stopped.can_transition_to(&Idle));
    }

    #[test]
    fn test_invalid_transitions() {
        use DictationPhase::*;
        assert!(!Idle.can_transition_to(&AutoRestarting));
        assert!(!Idle.can_transition_to(&Stopped));
        assert!(!Stopped.can_transition_to(&AutoRestarting));
        assert!(!Listening.can_transition_to(&Idle));

        // Cannot transition to self
        assert!(!Idle.can_transition_to(&Idle));
        assert!(!Listening.can_transition_to(&Listening));
        assert!(!AutoRestarting.can_transition_to(&AutoRestarting));
        assert!(!Stopped.can_transition_to(&Stopped));
    }

    #[test]
    fn test_is_active() {
        assert!(DictationPhase::Listening.is_active());
        assert!(DictationPhase::AutoRestarting.is_active());
        assert!(!DictationPhase::Idle.is_active());
        assert!(!DictationPhase::Stopped.is_active());
    }

    #[test]
    fn test_state_machine_restart_cycle() {
        let sm = StateMachine::new();
        sm.transition(DictationPhase::Listening).unwrap();
        for _ in 0..3 {
            sm.transition(DictationPhase::AutoRestarting).unwrap();
            sm.transition(DictationPhase::Listening).unwrap();
        }
        sm.transition(DictationPhase::Stopped).unwrap();
        assert_eq!(sm.current(), DictationPhase::Stopped);
    }

    #[test]
    fn test_state_machine_invalid_transition_keeps_phase() {
        let sm = StateMachine::new();
        let result = sm.transition(DictationPhase::Stopped);
        match result {
            Err(ConverseError::Dictation(msg)) => {
                assert!(msg.contains("Idle"));
                assert!(msg.contains("Stopped"));
            }
            _ => panic!("Expected Dictation error variant"),
        }
        assert_eq!(sm.current(), DictationPhase::Idle);
    }

    #[test]
    fn test_transition_from_guards_on_current_phase() {
        let sm = StateMachine::new();
        assert!(!sm.transition_from(&[DictationPhase::Listening], DictationPhase::Stopped));
        sm.transition(DictationPhase::Listening).unwrap();
        assert!(sm.transition_from(
            &[DictationPhase::Listening, DictationPhase::AutoRestarting],
            DictationPhase::Stopped
        ));
        assert_eq!(sm.current(), DictationPhase::Stopped);
    }

    #[test]
    fn test_state_machine_reset() {
        let sm = StateMachine::new();
        sm.transition(DictationPhase::Listening).unwrap();
        sm.transition(DictationPhase::AutoRestarting).unwrap();
        sm.reset();
        assert_eq!(sm.current(), DictationPhase::Idle);
    }

    #[test]
    fn test_state_machine_clone_is_shared() {
        let sm1 = StateMachine::new();
        let sm2 = sm1.clone();
        sm1.transition(DictationPhase::Listening).unwrap();
        assert_eq!(sm2.current(), DictationPhase::Listening);
    }
}
