//! Half-serialization of a subscriber.
//!
//! Items arrive from one thread while a terminal signal may arrive from
//! another (an upstream `on_next` racing a timeout or an inner failure).
//! [`HalfSerializer`] keeps `on_next` calls and the terminal signal from
//! overlapping: whichever thread is inside `on_next` when the terminal
//! signal lands delivers it on the way out.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::drain::WorkCoordinator;
use crate::error::{Error, ProtocolViolation};
use crate::error_slot::ErrorSlot;
use crate::hooks::Hooks;
use crate::traits::Subscriber;

/// Orders `on_next` against a concurrent terminal signal.
///
/// `on_next` itself must still come from one thread at a time. A terminal
/// signal after the first goes to the hooks: a late failure as itself, a late
/// completion as [`ProtocolViolation::DoubleTerminal`].
#[derive(Debug)]
pub struct HalfSerializer {
    wip: WorkCoordinator,
    errors: ErrorSlot,
    done: AtomicBool,
    hooks: Hooks,
}

impl HalfSerializer {
    pub fn new() -> Self {
        Self::with_hooks(Hooks::global())
    }

    pub fn with_hooks(hooks: Hooks) -> Self {
        Self {
            wip: WorkCoordinator::new(),
            errors: ErrorSlot::with_hooks(hooks.clone()),
            done: AtomicBool::new(false),
            hooks,
        }
    }

    /// Delivers `item` unless a terminal signal is in progress.
    ///
    /// Returns `false` if the item was dropped.
    pub fn on_next<T, S>(&self, subscriber: &S, item: T) -> bool
    where
        S: Subscriber<T> + ?Sized,
    {
        if !self.wip.try_enter() {
            return false;
        }
        subscriber.on_next(item);
        if !self.wip.leave() {
            // A terminal signal arrived while we were emitting.
            self.errors.try_terminate_subscriber::<T, S>(subscriber);
        }
        true
    }

    pub fn on_error<T, S>(&self, subscriber: &S, error: Error)
    where
        S: Subscriber<T> + ?Sized,
    {
        if self.done.swap(true, Ordering::AcqRel) {
            self.hooks.on_error(error);
            return;
        }
        if self.errors.try_add(error) && self.wip.enter() {
            self.errors.try_terminate_subscriber::<T, S>(subscriber);
        }
    }

    pub fn on_complete<T, S>(&self, subscriber: &S)
    where
        S: Subscriber<T> + ?Sized,
    {
        if self.done.swap(true, Ordering::AcqRel) {
            self.hooks.report_violation(ProtocolViolation::DoubleTerminal);
            return;
        }
        if self.wip.enter() {
            self.errors.try_terminate_subscriber::<T, S>(subscriber);
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.errors.is_terminated()
    }
}

impl Default for HalfSerializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::error_slot::tests::RecordingSubscriber;

    #[test]
    fn test_items_then_complete() {
        let serializer = HalfSerializer::with_hooks(Hooks::panicking());
        let subscriber = RecordingSubscriber::new();
        assert!(serializer.on_next(&*subscriber, 1));
        assert!(serializer.on_next(&*subscriber, 2));
        serializer.on_complete::<i32, _>(&*subscriber);

        assert!(!serializer.on_next(&*subscriber, 3));
        assert_eq!(subscriber.signals(), vec!["1", "2", "complete"]);
        assert!(serializer.is_terminated());
    }

    #[test]
    fn test_second_terminal_is_reported() {
        let (hooks, sink) = Hooks::recording();
        let serializer = HalfSerializer::with_hooks(hooks);
        let subscriber = RecordingSubscriber::new();
        serializer.on_error::<i32, _>(&*subscriber, Error::custom("first"));
        serializer.on_complete::<i32, _>(&*subscriber);
        serializer.on_error::<i32, _>(&*subscriber, Error::custom("second"));

        assert_eq!(subscriber.signals(), vec!["error"]);
        let recorded = sink.lock();
        assert_eq!(recorded.len(), 2);
        assert!(matches!(
            recorded[0],
            Error::Protocol(ProtocolViolation::DoubleTerminal)
        ));
        assert_eq!(recorded[1].to_string(), "second");
    }

    #[test]
    fn test_double_complete_reports_violation() {
        let (hooks, sink) = Hooks::recording();
        let serializer = HalfSerializer::with_hooks(hooks);
        let subscriber = RecordingSubscriber::new();
        serializer.on_complete::<i32, _>(&*subscriber);
        serializer.on_complete::<i32, _>(&*subscriber);

        assert_eq!(subscriber.signals(), vec!["complete"]);
        let recorded = sink.lock();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(
            recorded[0],
            Error::Protocol(ProtocolViolation::DoubleTerminal)
        ));
    }

    #[test]
    fn test_terminal_from_another_thread_never_overlaps_items() {
        for _ in 0..200 {
            let serializer = Arc::new(HalfSerializer::with_hooks(Hooks::panicking()));
            let subscriber = RecordingSubscriber::new();

            let terminator = {
                let serializer = Arc::clone(&serializer);
                let subscriber = Arc::clone(&subscriber);
                thread::spawn(move || serializer.on_error::<u32, _>(&*subscriber, Error::Cancelled))
            };
            for i in 0..50u32 {
                serializer.on_next(&*subscriber, i);
            }
            terminator.join().unwrap();

            let signals = subscriber.signals();
            assert_eq!(signals.last().map(String::as_str), Some("error"));
            assert_eq!(signals.iter().filter(|s| *s == "error").count(), 1);
        }
    }
}
