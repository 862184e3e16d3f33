use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::demand::atomic_add_cap;
use crate::error::ProtocolViolation;
use crate::hooks::Hooks;
use crate::traits::{Subscription, SubscriptionRef};

enum State {
    Empty,
    Active(SubscriptionRef),
    Cancelled,
}

/// An assign-once upstream holder with deferred demand.
///
/// Demand requested before the upstream arrives is accumulated (saturating)
/// and flushed to it in a single `request` call when [`set`](Self::set)
/// succeeds. A second `set` cancels the newcomer and reports
/// [`ProtocolViolation::SubscriptionAlreadySet`].
pub struct SingleArbiter {
    state: ArcSwap<State>,
    requested: AtomicU64,
    hooks: Hooks,
}

impl SingleArbiter {
    pub fn new() -> Self {
        Self::with_hooks(Hooks::global())
    }

    pub fn with_hooks(hooks: Hooks) -> Self {
        Self {
            state: ArcSwap::from_pointee(State::Empty),
            requested: AtomicU64::new(0),
            hooks,
        }
    }

    /// Attaches the upstream. Succeeds exactly once.
    pub fn set(&self, subscription: SubscriptionRef) -> bool {
        let current = self.state.load();
        match **current {
            State::Empty => {
                let previous = self.state.compare_and_swap(
                    &current,
                    Arc::new(State::Active(Arc::clone(&subscription))),
                );
                if Arc::ptr_eq(&*previous, &*current) {
                    let pending = self.requested.swap(0, Ordering::AcqRel);
                    if pending != 0 {
                        subscription.request(pending);
                    }
                    return true;
                }
                self.reject(&previous, subscription)
            }
            _ => self.reject(&current, subscription),
        }
    }

    fn reject(&self, state: &State, subscription: SubscriptionRef) -> bool {
        subscription.cancel();
        if !matches!(state, State::Cancelled) {
            self.hooks
                .report_violation(ProtocolViolation::SubscriptionAlreadySet);
        }
        false
    }

    /// Signals demand, forwarding it directly once attached.
    pub fn request(&self, n: u64) {
        if !self.hooks.validate_request(n) {
            return;
        }
        if let State::Active(upstream) = &**self.state.load() {
            upstream.request(n);
            return;
        }

        atomic_add_cap(&self.requested, n);

        // The upstream may have arrived between the check and the add; make
        // sure whatever we parked reaches it.
        if let State::Active(upstream) = &**self.state.load() {
            let pending = self.requested.swap(0, Ordering::AcqRel);
            if pending != 0 {
                upstream.request(pending);
            }
        }
    }

    /// Cancels the upstream, now or on arrival. Returns `true` for the first call.
    pub fn cancel(&self) -> bool {
        let previous = self.state.swap(Arc::new(State::Cancelled));
        match &*previous {
            State::Cancelled => false,
            State::Active(upstream) => {
                upstream.cancel();
                true
            }
            State::Empty => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(**self.state.load(), State::Cancelled)
    }

    pub fn is_attached(&self) -> bool {
        matches!(**self.state.load(), State::Active(_))
    }

    /// Demand parked while no upstream is attached.
    pub fn pending(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }
}

impl Default for SingleArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for SingleArbiter {
    fn request(&self, n: u64) {
        SingleArbiter::request(self, n);
    }

    fn cancel(&self) {
        SingleArbiter::cancel(self);
    }
}

impl std::fmt::Debug for SingleArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match **self.state.load() {
            State::Empty => "Empty",
            State::Active(_) => "Active",
            State::Cancelled => "Cancelled",
        };
        f.debug_struct("SingleArbiter")
            .field("state", &state)
            .field("pending", &self.pending())
            .finish()
    }
}
