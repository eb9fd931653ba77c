//! Run-once release action shared by cancellation and termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Boxed release action.
pub type CleanupAction = Box<dyn FnOnce() + Send + 'static>;

/// Holds an optional release action that runs at most once.
///
/// Whoever flips `done` first owns the release; the action itself is taken
/// out of the slot under a lock so an installer racing with [`run`](Self::run)
/// can never see it executed twice.
#[derive(Default)]
pub struct CleanupSlot {
    done: AtomicBool,
    action: Mutex<Option<CleanupAction>>,
}

impl std::fmt::Debug for CleanupSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupSlot")
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

impl CleanupSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the release action, replacing any previous one. If the slot was
    /// already consumed the action runs immediately.
    pub fn set(&self, action: CleanupAction) {
        *self.action.lock().unwrap_or_else(PoisonError::into_inner) = Some(action);
        if self.is_done() {
            self.take_and_run();
        }
    }

    /// Consume the slot. Returns `true` only for the caller that performed the
    /// transition.
    pub fn run(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.take_and_run();
        true
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn take_and_run(&self) {
        let action = self
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            action();
        }
    }
}
