//! The work coordinator: non-blocking "exactly one active worker".
//!
//! Every thread that has something for the delivery loop (a new item, new
//! demand, a cancellation, a resubscription) increments one counter. The
//! thread that moves it from zero to one becomes the sole worker; everyone
//! else just leaves their contribution behind. Before exiting, the worker
//! subtracts the signals it has accounted for; a non-zero remainder means
//! someone signalled while it was busy, so it loops again instead of losing
//! the wakeup.
//!
//! ```rust
//! use fluxweld::drain::WorkCoordinator;
//!
//! let wip = WorkCoordinator::new();
//! let mut runs = 0;
//! wip.drain(|| runs += 1);
//! assert_eq!(runs, 1);
//! assert!(!wip.is_active());
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::trace;

/// A reentrancy counter plus a cooperative cancellation flag.
#[derive(Debug, Default)]
pub struct WorkCoordinator {
    wip: AtomicUsize,
    cancelled: AtomicBool,
}

impl WorkCoordinator {
    pub const fn new() -> Self {
        Self {
            wip: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Signals work. Returns `true` if the caller became the active worker.
    #[inline]
    pub fn enter(&self) -> bool {
        self.wip.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Becomes the active worker only if nobody else is, without leaving a
    /// signal behind on failure.
    #[inline]
    pub fn try_enter(&self) -> bool {
        self.wip
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Gives up one signal. Returns `true` if no work remains.
    #[inline]
    pub fn leave(&self) -> bool {
        self.wip.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Gives up `missed` accounted-for signals and returns how many arrived
    /// meanwhile. Zero means the worker may exit.
    #[inline]
    pub fn leave_missed(&self, missed: usize) -> usize {
        self.wip.fetch_sub(missed, Ordering::AcqRel) - missed
    }

    /// Whether some worker is currently active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.wip.load(Ordering::Acquire) != 0
    }

    /// Sets the cancelled flag. Returns `true` for the first call.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Signals work and, if this call became the worker, runs `body` until no
    /// signal is left unaccounted for.
    ///
    /// Returns `true` if the calling thread did the draining.
    pub fn drain<F>(&self, mut body: F) -> bool
    where
        F: FnMut(),
    {
        if !self.enter() {
            return false;
        }
        let mut missed = 1;
        loop {
            body();
            missed = self.leave_missed(missed);
            if missed == 0 {
                return true;
            }
            trace!(missed, "drain loop re-entered");
        }
    }
}
