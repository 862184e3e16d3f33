//! The error slot: one terminal failure out of many concurrent ones.
//!
//! Stages with several failure sources (an inner and an outer stream, a
//! callback and an upstream) record every failure here. The slot folds them
//! into a single aggregate in arrival order, and delivering the terminal
//! signal moves it to an absorbing `Terminal` state so the downstream sees at
//! most one `on_error` or `on_complete`.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::Error;
use crate::hooks::Hooks;
use crate::traits::{CompletableObserver, SingleObserver, Subscriber};

enum SlotState {
    Clear,
    Failed(Error),
    Terminal,
}

/// What the slot held when it was terminated.
#[derive(Debug, Clone)]
pub enum Termination {
    /// One or more failures were recorded.
    Failed(Error),
    /// Nothing went wrong.
    Completed,
}

/// Accumulates failures until the terminal signal is delivered.
pub struct ErrorSlot {
    state: ArcSwap<SlotState>,
    hooks: Hooks,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::with_hooks(Hooks::global())
    }

    pub fn with_hooks(hooks: Hooks) -> Self {
        Self {
            state: ArcSwap::from_pointee(SlotState::Clear),
            hooks,
        }
    }

    /// Records a failure.
    ///
    /// Returns `false` if the slot already delivered its terminal signal; the
    /// failure then goes to the hooks instead of being dropped.
    pub fn try_add(&self, error: Error) -> bool {
        let mut current = self.state.load();
        loop {
            let next = match &**current {
                SlotState::Terminal => {
                    self.hooks.on_error(error);
                    return false;
                }
                SlotState::Clear => error.clone(),
                SlotState::Failed(existing) => Error::compose(existing.clone(), error.clone()),
            };
            let previous = self
                .state
                .compare_and_swap(&current, Arc::new(SlotState::Failed(next)));
            if Arc::ptr_eq(&*previous, &*current) {
                return true;
            }
            current = self.state.load();
        }
    }

    /// Moves to the terminal state and returns what was held.
    ///
    /// `None` means an earlier call already terminated the slot.
    pub fn terminate(&self) -> Option<Termination> {
        let previous = self.state.swap(Arc::new(SlotState::Terminal));
        match &*previous {
            SlotState::Terminal => None,
            SlotState::Clear => Some(Termination::Completed),
            SlotState::Failed(error) => Some(Termination::Failed(error.clone())),
        }
    }

    /// A snapshot of the accumulated failure, if any.
    pub fn get(&self) -> Option<Error> {
        match &**self.state.load() {
            SlotState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn has_error(&self) -> bool {
        matches!(**self.state.load(), SlotState::Failed(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(**self.state.load(), SlotState::Terminal)
    }

    /// Terminates and signals `subscriber` with the outcome, exactly once.
    ///
    /// Returns `true` if this call delivered the terminal signal.
    pub fn try_terminate_subscriber<T, S>(&self, subscriber: &S) -> bool
    where
        S: Subscriber<T> + ?Sized,
    {
        match self.terminate() {
            Some(Termination::Failed(error)) => subscriber.on_error(error),
            Some(Termination::Completed) => subscriber.on_complete(),
            None => return false,
        }
        true
    }

    /// Terminates and signals a failure to `observer`.
    ///
    /// A single-value stream has no value-less completion, so an empty slot
    /// delivers nothing and the caller is expected to emit `on_success`.
    pub fn try_terminate_single<T, O>(&self, observer: &O) -> bool
    where
        O: SingleObserver<T> + ?Sized,
    {
        match self.terminate() {
            Some(Termination::Failed(error)) => {
                observer.on_error(error);
                true
            }
            Some(Termination::Completed) | None => false,
        }
    }

    /// Terminates and signals `observer` with the outcome, exactly once.
    pub fn try_terminate_completable<O>(&self, observer: &O) -> bool
    where
        O: CompletableObserver + ?Sized,
    {
        match self.terminate() {
            Some(Termination::Failed(error)) => observer.on_error(error),
            Some(Termination::Completed) => observer.on_complete(),
            None => return false,
        }
        true
    }
}

impl Default for ErrorSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ErrorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &**self.state.load() {
            SlotState::Clear => "Clear",
            SlotState::Failed(_) => "Failed",
            SlotState::Terminal => "Terminal",
        };
        f.debug_struct("ErrorSlot").field("state", &state).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use parking_lot::Mutex;

    use super::*;
    use crate::traits::{Handle, SubscriptionRef};

    /// Records every signal a subscriber receives, rendered as strings.
    #[derive(Default)]
    pub(crate) struct RecordingSubscriber {
        pub(crate) signals: Mutex<Vec<String>>,
        pub(crate) errors: Mutex<Vec<Error>>,
        pub(crate) subscription: Mutex<Option<SubscriptionRef>>,
    }

    impl RecordingSubscriber {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn signals(&self) -> Vec<String> {
            self.signals.lock().clone()
        }
    }

    impl<T: std::fmt::Debug> Subscriber<T> for RecordingSubscriber {
        fn on_subscribe(&self, subscription: SubscriptionRef) {
            *self.subscription.lock() = Some(subscription);
        }

        fn on_next(&self, item: T) {
            self.signals.lock().push(format!("{:?}", item));
        }

        fn on_error(&self, error: Error) {
            self.signals.lock().push("error".to_string());
            self.errors.lock().push(error);
        }

        fn on_complete(&self) {
            self.signals.lock().push("complete".to_string());
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        completions: AtomicUsize,
        errors: AtomicUsize,
    }

    impl CompletableObserver for CountingObserver {
        fn on_subscribe(&self, _handle: Handle) {}

        fn on_complete(&self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: Error) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SingleObserver<u32> for CountingObserver {
        fn on_subscribe(&self, _handle: Handle) {}

        fn on_success(&self, _value: u32) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: Error) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_failures_aggregate_in_arrival_order() {
        let slot = ErrorSlot::with_hooks(Hooks::panicking());
        assert!(slot.try_add(Error::custom("A")));
        assert!(slot.try_add(Error::custom("B")));

        let subscriber = RecordingSubscriber::new();
        assert!(slot.try_terminate_subscriber::<u32, _>(&*subscriber));

        let errors = subscriber.errors.lock();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            Error::Composite(inner) => {
                let rendered: Vec<_> = inner.iter().map(|e| e.to_string()).collect();
                assert_eq!(rendered, vec!["A", "B"]);
            }
            other => panic!("expected a composite, got {other:?}"),
        }
    }

    #[test]
    fn test_single_failure_is_not_wrapped() {
        let slot = ErrorSlot::with_hooks(Hooks::panicking());
        slot.try_add(Error::Cancelled);
        match slot.terminate() {
            Some(Termination::Failed(Error::Cancelled)) => {}
            other => panic!("unexpected termination: {other:?}"),
        }
    }

    #[test]
    fn test_empty_slot_completes_once() {
        let slot = ErrorSlot::with_hooks(Hooks::panicking());
        let subscriber = RecordingSubscriber::new();
        assert!(slot.try_terminate_subscriber::<u32, _>(&*subscriber));
        assert!(!slot.try_terminate_subscriber::<u32, _>(&*subscriber));
        assert_eq!(subscriber.signals(), vec!["complete"]);
    }

    #[test]
    fn test_late_failure_goes_to_hooks() {
        let (hooks, sink) = Hooks::recording();
        let slot = ErrorSlot::with_hooks(hooks);
        assert!(matches!(slot.terminate(), Some(Termination::Completed)));

        assert!(!slot.try_add(Error::custom("late")));
        assert_eq!(sink.lock().len(), 1);
        assert_eq!(sink.lock()[0].to_string(), "late");
    }

    #[test]
    fn test_completable_and_single_dispatch() {
        let observer = CountingObserver::default();

        let slot = ErrorSlot::with_hooks(Hooks::panicking());
        assert!(slot.try_terminate_completable(&observer));
        assert_eq!(observer.completions.load(Ordering::SeqCst), 1);

        let slot = ErrorSlot::with_hooks(Hooks::panicking());
        assert!(!slot.try_terminate_single::<u32, _>(&observer));
        assert!(slot.is_terminated());

        let slot = ErrorSlot::with_hooks(Hooks::panicking());
        slot.try_add(Error::custom("boom"));
        assert!(slot.try_terminate_single::<u32, _>(&observer));
        assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_adds_keep_every_failure() {
        let slot = Arc::new(ErrorSlot::with_hooks(Hooks::panicking()));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for i in 0..50 {
                        slot.try_add(Error::custom(format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        match slot.terminate() {
            Some(Termination::Failed(error)) => assert_eq!(error.flatten().len(), 200),
            other => panic!("unexpected termination: {other:?}"),
        }
    }
}
