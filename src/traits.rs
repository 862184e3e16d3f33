//! Core traits for push-based streams.
//!
//! This module defines the stage contracts for the three stream variants:
//! a demand-regulated multi-value stream ([`Publisher`] / [`Subscriber`]), a
//! single deferred value ([`SingleSource`] / [`SingleObserver`]) and a
//! value-less completion signal ([`CompletableSource`] /
//! [`CompletableObserver`]).
//!
//! Every stage receives exactly one `on_subscribe` first, then for
//! multi-value streams any number of `on_next` followed by at most one
//! terminal signal (`on_error` xor `on_complete`). Breaking that order is a
//! [`ProtocolViolation`](crate::error::ProtocolViolation), reported through
//! [`Hooks`](crate::hooks::Hooks) rather than returned.

use std::sync::Arc;

use crate::error::Error;

/// A demand channel from a subscriber back to its upstream.
///
/// # Examples
///
/// ```rust
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use fluxweld::traits::Subscription;
///
/// struct Counting(AtomicU64);
///
/// impl Subscription for Counting {
///     fn request(&self, n: u64) {
///         self.0.fetch_add(n, Ordering::Relaxed);
///     }
///
///     fn cancel(&self) {}
/// }
/// ```
pub trait Subscription: Send + Sync {
    /// Signal demand for `n` more items. `n` must be positive.
    fn request(&self, n: u64);

    /// Stop future delivery. Idempotent; in-flight work may still finish.
    fn cancel(&self);
}

/// A cancellable unit of work or attachment.
///
/// Disposing more than once must be a no-op.
pub trait Disposable: Send + Sync {
    /// Release the underlying resource.
    fn dispose(&self);

    /// Whether `dispose` has run.
    fn is_disposed(&self) -> bool;
}

/// Shared handle to a subscription.
pub type SubscriptionRef = Arc<dyn Subscription>;

/// Shared handle to a disposable resource.
pub type Handle = Arc<dyn Disposable>;

/// Receives the signals of a multi-value stream.
pub trait Subscriber<T>: Send + Sync {
    /// Called once with the upstream's demand channel.
    fn on_subscribe(&self, subscription: SubscriptionRef);

    /// Called for each item, never beyond outstanding demand.
    fn on_next(&self, item: T);

    /// Terminal failure.
    fn on_error(&self, error: Error);

    /// Terminal completion.
    fn on_complete(&self);
}

/// A source of a multi-value, demand-regulated stream.
pub trait Publisher<T>: Send + Sync {
    /// Attach a subscriber. The publisher calls `on_subscribe` before anything else.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// Receives the outcome of a single-value stream.
pub trait SingleObserver<T>: Send + Sync {
    /// Called once with a handle that cancels the pending value.
    fn on_subscribe(&self, handle: Handle);

    /// Terminal value.
    fn on_success(&self, value: T);

    /// Terminal failure.
    fn on_error(&self, error: Error);
}

/// A source of exactly one value or one failure.
pub trait SingleSource<T>: Send + Sync {
    /// Attach an observer.
    fn subscribe(&self, observer: Arc<dyn SingleObserver<T>>);
}

/// Receives the outcome of a completion-only stream.
pub trait CompletableObserver: Send + Sync {
    /// Called once with a handle that cancels the pending completion.
    fn on_subscribe(&self, handle: Handle);

    /// Terminal completion.
    fn on_complete(&self);

    /// Terminal failure.
    fn on_error(&self, error: Error);
}

/// A source of a value-less completion signal.
pub trait CompletableSource: Send + Sync {
    /// Attach an observer.
    fn subscribe(&self, observer: Arc<dyn CompletableObserver>);
}
