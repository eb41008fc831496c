//! Dialogue state machine.
//!
//! Four states, a fixed forward cycle, and a forced-reset escape hatch.
//! Components never mutate the state themselves; they go through the
//! orchestrator, which owns the machine. The change callback runs inside
//! the transition's critical section so it can never observe an
//! interleaved state.

use parking_lot::Mutex;

/// Lifecycle state of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    /// Waiting for the wake word.
    Idle,
    /// Capturing an utterance.
    Listening,
    /// Running the LLM / tool loop.
    Processing,
    /// Producing audio output (speech or music).
    Speaking,
}

impl DialogueState {
    /// Short name for logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Listening => "Listening",
            Self::Processing => "Processing",
            Self::Speaking => "Speaking",
        }
    }

    /// Whether `self -> to` is on the legal path. The reset to `Idle` is
    /// always legal from anywhere.
    fn allows(self, to: DialogueState) -> bool {
        if to == Self::Idle {
            return true;
        }
        matches!(
            (self, to),
            (Self::Idle, Self::Listening)
                | (Self::Listening, Self::Processing)
                | (Self::Processing, Self::Speaking)
        )
    }
}

type ChangeCallback = Box<dyn Fn(DialogueState, DialogueState) + Send + Sync>;

/// Serialized check-and-set over the dialogue state.
pub struct StateMachine {
    state: Mutex<DialogueState>,
    on_change: Mutex<Option<ChangeCallback>>,
}

impl StateMachine {
    /// Creates the machine in `Idle`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DialogueState::Idle),
            on_change: Mutex::new(None),
        }
    }

    /// Installs the change callback. It fires only on actual changes.
    pub fn on_change(&self, callback: impl Fn(DialogueState, DialogueState) + Send + Sync + 'static) {
        *self.on_change.lock() = Some(Box::new(callback));
    }

    /// The current state.
    pub fn current(&self) -> DialogueState {
        *self.state.lock()
    }

    /// Attempts a legal transition. Illegal requests are rejected with no
    /// side effects; a same-state request is accepted silently.
    pub fn transition(&self, to: DialogueState) -> bool {
        let mut state = self.state.lock();
        let from = *state;
        if from == to {
            return true;
        }
        if !from.allows(to) {
            log::warn!(
                "[State] Rejected illegal transition {} -> {}",
                from.name(),
                to.name()
            );
            return false;
        }
        *state = to;
        self.fire(from, to);
        true
    }

    /// Forced reset: sets the state unconditionally. Used by the interrupt
    /// sequence, continuous dialogue, and ambient speech.
    pub fn force(&self, to: DialogueState) {
        let mut state = self.state.lock();
        let from = *state;
        if from == to {
            return;
        }
        *state = to;
        self.fire(from, to);
    }

    /// Fires the callback while the state lock is held.
    fn fire(&self, from: DialogueState, to: DialogueState) {
        log::debug!("[State] {} -> {}", from.name(), to.name());
        if let Some(callback) = self.on_change.lock().as_ref() {
            callback(from, to);
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn forward_cycle_is_legal() {
        let machine = StateMachine::new();
        assert!(machine.transition(DialogueState::Listening));
        assert!(machine.transition(DialogueState::Processing));
        assert!(machine.transition(DialogueState::Speaking));
        assert!(machine.transition(DialogueState::Idle));
        assert_eq!(machine.current(), DialogueState::Idle);
    }

    #[test]
    fn illegal_transition_is_rejected_without_side_effects() {
        let machine = StateMachine::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        machine.on_change(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!machine.transition(DialogueState::Speaking));
        assert_eq!(machine.current(), DialogueState::Idle);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reset_to_idle_is_always_legal() {
        let machine = StateMachine::new();
        machine.transition(DialogueState::Listening);
        assert!(machine.transition(DialogueState::Idle));
        machine.transition(DialogueState::Listening);
        machine.transition(DialogueState::Processing);
        assert!(machine.transition(DialogueState::Idle));
    }

    #[test]
    fn same_state_does_not_fire_callback() {
        let machine = StateMachine::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        machine.on_change(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(machine.transition(DialogueState::Idle));
        machine.force(DialogueState::Idle);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn force_bypasses_legality() {
        let machine = StateMachine::new();
        machine.force(DialogueState::Speaking);
        assert_eq!(machine.current(), DialogueState::Speaking);
        machine.force(DialogueState::Listening);
        assert_eq!(machine.current(), DialogueState::Listening);
    }

    #[test]
    fn callback_sees_from_and_to() {
        let machine = StateMachine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        machine.on_change(move |from, to| {
            sink.lock().push((from, to));
        });
        machine.transition(DialogueState::Listening);
        machine.force(DialogueState::Idle);
        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                (DialogueState::Idle, DialogueState::Listening),
                (DialogueState::Listening, DialogueState::Idle),
            ]
        );
    }
}
