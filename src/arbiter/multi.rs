use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::demand::{add_cap, atomic_add_cap, produced_local, UNBOUNDED};
use crate::drain::WorkCoordinator;
use crate::hooks::Hooks;
use crate::traits::{Subscription, SubscriptionRef};

struct Pending(SubscriptionRef);

/// Fields only touched by the thread holding the work coordinator.
struct Owned {
    actual: Option<SubscriptionRef>,
    requested: u64,
}

/// An upstream holder whose subscription may be replaced at any time.
///
/// Demand (`request`) and deliveries (`produced`) feed one serialized drain.
/// When a caller finds the drain idle it updates the books directly;
/// otherwise it parks its contribution in a "missed" counter (or the missed
/// subscription slot) for the active drainer to fold in:
///
/// `outstanding = requested + missed_requested - missed_produced`
///
/// clamped at zero. Going negative means more was delivered than requested;
/// that is reported and the stream carries on with zero demand.
///
/// A replacement subscription receives the full outstanding demand, and the
/// one it replaces is cancelled (unless built with
/// [`keep_replaced`](Self::keep_replaced)).
pub struct MultiArbiter {
    wip: WorkCoordinator,
    owned: UnsafeCell<Owned>,
    missed_subscription: ArcSwapOption<Pending>,
    missed_requested: AtomicU64,
    missed_produced: AtomicU64,
    cancelled: AtomicBool,
    unbounded: AtomicBool,
    cancel_on_replace: bool,
    hooks: Hooks,
}

// SAFETY: `owned` is only accessed by the thread that holds `wip`, which
// serializes all access; everything else is atomic.
unsafe impl Send for MultiArbiter {}
unsafe impl Sync for MultiArbiter {}

impl MultiArbiter {
    pub fn new() -> Self {
        Self::with_hooks(Hooks::global())
    }

    pub fn with_hooks(hooks: Hooks) -> Self {
        Self {
            wip: WorkCoordinator::new(),
            owned: UnsafeCell::new(Owned {
                actual: None,
                requested: 0,
            }),
            missed_subscription: ArcSwapOption::empty(),
            missed_requested: AtomicU64::new(0),
            missed_produced: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            unbounded: AtomicBool::new(false),
            cancel_on_replace: true,
            hooks,
        }
    }

    /// Do not cancel a subscription when it is replaced.
    ///
    /// For sources that complete on their own before being replaced, such as
    /// `concat`-style sequencing.
    pub fn keep_replaced(mut self) -> Self {
        self.cancel_on_replace = false;
        self
    }

    /// Installs `next` as the active upstream.
    pub fn set(&self, next: SubscriptionRef) {
        if self.is_cancelled() {
            next.cancel();
            return;
        }

        if self.wip.try_enter() {
            let outstanding = {
                // SAFETY: we hold the coordinator.
                let owned = unsafe { &mut *self.owned.get() };
                if let Some(previous) = owned.actual.replace(Arc::clone(&next)) {
                    debug!("arbiter replaced active subscription");
                    if self.cancel_on_replace {
                        previous.cancel();
                    }
                }
                owned.requested
            };
            if !self.wip.leave() {
                self.drain_loop();
            }
            if self.is_cancelled() {
                // A cancel that finished draining before we installed `next`
                // never saw it.
                next.cancel();
                return;
            }
            if outstanding != 0 {
                next.request(outstanding);
            }
            return;
        }

        let displaced = self.missed_subscription.swap(Some(Arc::new(Pending(next))));
        if let Some(displaced) = displaced {
            if self.cancel_on_replace {
                displaced.0.cancel();
            }
        }
        self.drain();
    }

    /// Adds demand and forwards it to the active upstream.
    pub fn request(&self, n: u64) {
        if !self.hooks.validate_request(n) || self.unbounded.load(Ordering::Acquire) {
            return;
        }

        if self.wip.try_enter() {
            let actual = {
                // SAFETY: we hold the coordinator.
                let owned = unsafe { &mut *self.owned.get() };
                if owned.requested != UNBOUNDED {
                    owned.requested = add_cap(owned.requested, n);
                    if owned.requested == UNBOUNDED {
                        self.unbounded.store(true, Ordering::Release);
                    }
                }
                owned.actual.clone()
            };
            if !self.wip.leave() {
                self.drain_loop();
            }
            if let Some(actual) = actual {
                actual.request(n);
            }
            return;
        }

        atomic_add_cap(&self.missed_requested, n);
        self.drain();
    }

    /// Records `n` items as delivered, reducing outstanding demand.
    pub fn produced(&self, n: u64) {
        if self.unbounded.load(Ordering::Acquire) {
            return;
        }

        if self.wip.try_enter() {
            {
                // SAFETY: we hold the coordinator.
                let owned = unsafe { &mut *self.owned.get() };
                owned.requested = produced_local(owned.requested, n, &self.hooks);
            }
            if !self.wip.leave() {
                self.drain_loop();
            }
            return;
        }

        atomic_add_cap(&self.missed_produced, n);
        self.drain();
    }

    /// Cancels the active and any pending subscription, now and on arrival.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.drain();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the downstream asked for everything.
    pub fn is_unbounded(&self) -> bool {
        self.unbounded.load(Ordering::Acquire)
    }

    fn drain(&self) {
        if self.wip.enter() {
            self.drain_loop();
        }
    }

    fn drain_loop(&self) {
        let mut missed = 1;
        let mut request_amount = 0u64;
        let mut request_target: Option<SubscriptionRef> = None;

        loop {
            let missed_subscription = if self.missed_subscription.load().is_some() {
                self.missed_subscription.swap(None)
            } else {
                None
            };
            let missed_requested = take_nonzero(&self.missed_requested);
            let missed_produced = take_nonzero(&self.missed_produced);

            // SAFETY: we hold the coordinator.
            let owned = unsafe { &mut *self.owned.get() };

            if self.cancelled.load(Ordering::Acquire) {
                if let Some(actual) = owned.actual.take() {
                    actual.cancel();
                }
                if let Some(pending) = missed_subscription {
                    pending.0.cancel();
                }
                request_amount = 0;
                request_target = None;
            } else {
                let mut outstanding = owned.requested;
                if outstanding != UNBOUNDED {
                    outstanding = add_cap(outstanding, missed_requested);
                    if outstanding != UNBOUNDED {
                        outstanding = produced_local(outstanding, missed_produced, &self.hooks);
                    } else {
                        self.unbounded.store(true, Ordering::Release);
                    }
                    owned.requested = outstanding;
                }

                if let Some(pending) = missed_subscription {
                    let next = Arc::clone(&pending.0);
                    if let Some(previous) = owned.actual.replace(Arc::clone(&next)) {
                        debug!("arbiter replaced active subscription");
                        if self.cancel_on_replace {
                            previous.cancel();
                        }
                    }
                    // The newcomer gets everything outstanding; anything
                    // accumulated for the old upstream is superseded.
                    request_amount = outstanding;
                    request_target = (outstanding != 0).then_some(next);
                } else if missed_requested != 0 {
                    if let Some(actual) = &owned.actual {
                        request_amount = add_cap(request_amount, missed_requested);
                        request_target = Some(Arc::clone(actual));
                    }
                }
            }

            missed = self.wip.leave_missed(missed);
            if missed == 0 {
                if let Some(target) = request_target {
                    if request_amount != 0 {
                        target.request(request_amount);
                    }
                }
                return;
            }
        }
    }
}

fn take_nonzero(field: &AtomicU64) -> u64 {
    if field.load(Ordering::Acquire) != 0 {
        field.swap(0, Ordering::AcqRel)
    } else {
        0
    }
}

impl Default for MultiArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription for MultiArbiter {
    fn request(&self, n: u64) {
        MultiArbiter::request(self, n);
    }

    fn cancel(&self) {
        MultiArbiter::cancel(self);
    }
}

impl std::fmt::Debug for MultiArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiArbiter")
            .field("cancelled", &self.is_cancelled())
            .field("unbounded", &self.is_unbounded())
            .finish_non_exhaustive()
    }
}
