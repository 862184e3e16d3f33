//! Demand accounting with saturating arithmetic.
//!
//! Outstanding demand is a `u64` that saturates at [`UNBOUNDED`]: once a
//! subscriber has asked for "everything" no further request or delivery
//! changes the count. Demand never wraps and never goes below zero.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ProtocolViolation;
use crate::hooks::Hooks;

/// Demand value meaning "deliver everything".
pub const UNBOUNDED: u64 = u64::MAX;

/// Adds two demand amounts, saturating at [`UNBOUNDED`].
#[inline]
pub fn add_cap(a: u64, b: u64) -> u64 {
    a.checked_add(b).unwrap_or(UNBOUNDED)
}

/// Multiplies two demand amounts, saturating at [`UNBOUNDED`].
#[inline]
pub fn multiply_cap(a: u64, b: u64) -> u64 {
    a.checked_mul(b).unwrap_or(UNBOUNDED)
}

/// Atomically adds `n` to `field` with [`add_cap`] semantics.
///
/// Returns the value before the update, so callers can detect the
/// zero-to-nonzero transition that means "start emitting".
pub fn atomic_add_cap(field: &AtomicU64, n: u64) -> u64 {
    let mut current = field.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        match field.compare_exchange_weak(
            current,
            add_cap(current, n),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(previous) => return previous,
            Err(actual) => current = actual,
        }
    }
}

/// Atomically subtracts `n` delivered items from `field`.
///
/// Unbounded demand is left untouched. Delivering more than was requested
/// clamps the counter at zero and reports
/// [`ProtocolViolation::MoreProducedThanRequested`]. Returns the remaining
/// demand.
pub fn produced(field: &AtomicU64, n: u64, hooks: &Hooks) -> u64 {
    let mut current = field.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let (update, overflowed) = match current.checked_sub(n) {
            Some(update) => (update, false),
            None => (0, true),
        };
        match field.compare_exchange_weak(current, update, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                if overflowed {
                    hooks.report_violation(ProtocolViolation::MoreProducedThanRequested(n));
                }
                return update;
            }
            Err(actual) => current = actual,
        }
    }
}

/// Subtracts delivered items from a non-atomic demand value owned by a drain
/// loop, with the same clamping policy as [`produced`].
pub fn produced_local(requested: u64, n: u64, hooks: &Hooks) -> u64 {
    if requested == UNBOUNDED {
        return UNBOUNDED;
    }
    match requested.checked_sub(n) {
        Some(remaining) => remaining,
        None => {
            hooks.report_violation(ProtocolViolation::MoreProducedThanRequested(n));
            0
        }
    }
}

/// An outstanding-demand counter.
#[derive(Debug, Default)]
pub struct DemandCounter {
    requested: AtomicU64,
}

impl DemandCounter {
    /// A counter with no outstanding demand.
    pub const fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
        }
    }

    /// Adds demand, returning the value before the update.
    pub fn request(&self, n: u64) -> u64 {
        atomic_add_cap(&self.requested, n)
    }

    /// Removes delivered items, returning what is left.
    pub fn produced(&self, n: u64, hooks: &Hooks) -> u64 {
        produced(&self.requested, n, hooks)
    }

    /// Takes all outstanding demand, leaving zero behind.
    pub fn take(&self) -> u64 {
        self.requested.swap(0, Ordering::AcqRel)
    }

    /// Current outstanding demand.
    pub fn get(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Whether the subscriber asked for everything.
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }
}
