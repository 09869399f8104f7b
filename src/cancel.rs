//! Cancellation Signal
//!
//! Shared cancel source polled by the orchestrator, the local copy loop and
//! the remote session wait. It combines an internal flag (set through
//! [`CancellationSignal::cancel`]) with an optional caller-supplied hook that
//! is consulted on every poll.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Externally supplied "has the user cancelled?" query
pub type CancelHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// Cloneable, thread-safe cancellation source
#[derive(Clone, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
    hook: Option<CancelHook>,
}

impl CancellationSignal {
    /// Create a signal with no external hook
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal that also polls `hook`
    pub fn with_hook(hook: CancelHook) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            hook: Some(hook),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Poll the signal.
    ///
    /// Once the hook reports cancellation the result latches, so later polls
    /// stay cancelled even if the hook flips back.
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match &self.hook {
            Some(hook) if hook() => {
                self.flag.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.flag.load(Ordering::SeqCst))
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}
