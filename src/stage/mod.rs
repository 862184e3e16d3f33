//! Stages assembled from the substrate.
//!
//! - [`BufferedRelay`]: a prefetching hop between threads, with batched
//!   upstream replenishment and an optional scheduler for its drain loop
//! - [`RelayStream`]: the same hop, consumed as a `futures` [`Stream`](futures_core::Stream)
//! - [`Deadline`]: a timeout for single-value streams

mod deadline;
mod relay;
mod stream;

pub use deadline::Deadline;
pub use relay::{BufferedRelay, RelayBuilder};
pub use stream::{into_stream, PublisherExt, RelayStream};

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::demand::DemandCounter;
    use crate::drain::WorkCoordinator;
    use crate::error::Error;
    use crate::hooks::Hooks;
    use crate::traits::{Publisher, Subscriber, Subscription};

    /// Emits `start..end` honouring demand, synchronously on the requesting thread.
    pub(crate) struct Range {
        start: u32,
        end: u32,
        requests: Arc<Mutex<Vec<u64>>>,
        cancelled: Arc<AtomicBool>,
    }

    impl Range {
        pub(crate) fn new(start: u32, end: u32) -> Self {
            Self {
                start,
                end,
                requests: Arc::default(),
                cancelled: Arc::default(),
            }
        }

        pub(crate) fn requests(&self) -> Vec<u64> {
            self.requests.lock().clone()
        }

        pub(crate) fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    struct RangeSubscription {
        next: AtomicU32,
        end: u32,
        requested: DemandCounter,
        wip: WorkCoordinator,
        completed: AtomicBool,
        subscriber: Arc<dyn Subscriber<u32>>,
        requests: Arc<Mutex<Vec<u64>>>,
        cancelled: Arc<AtomicBool>,
        hooks: Hooks,
    }

    impl RangeSubscription {
        fn emit(&self) {
            loop {
                if self.wip.is_cancelled() {
                    return;
                }
                let next = self.next.load(Ordering::Relaxed);
                if next == self.end {
                    if !self.completed.swap(true, Ordering::AcqRel) {
                        self.subscriber.on_complete();
                    }
                    return;
                }
                if self.requested.get() == 0 {
                    return;
                }
                self.next.store(next + 1, Ordering::Relaxed);
                self.requested.produced(1, &self.hooks);
                self.subscriber.on_next(next);
            }
        }
    }

    impl Subscription for RangeSubscription {
        fn request(&self, n: u64) {
            self.requests.lock().push(n);
            self.requested.request(n);
            self.wip.drain(|| self.emit());
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.wip.cancel();
        }
    }

    impl Publisher<u32> for Range {
        fn subscribe(&self, subscriber: Arc<dyn Subscriber<u32>>) {
            let subscription = Arc::new(RangeSubscription {
                next: AtomicU32::new(self.start),
                end: self.end,
                requested: DemandCounter::new(),
                wip: WorkCoordinator::new(),
                completed: AtomicBool::new(false),
                subscriber: Arc::clone(&subscriber),
                requests: Arc::clone(&self.requests),
                cancelled: Arc::clone(&self.cancelled),
                hooks: Hooks::panicking(),
            });
            subscriber.on_subscribe(subscription.clone());
            subscription.wip.drain(|| subscription.emit());
        }
    }

    /// A subscription that ignores demand; the source pushes on its own.
    struct Unregulated;

    impl Subscription for Unregulated {
        fn request(&self, _n: u64) {}

        fn cancel(&self) {}
    }

    /// Emits fixed items, then fails.
    pub(crate) struct Failing {
        items: Vec<u32>,
        message: &'static str,
    }

    impl Failing {
        pub(crate) fn new(items: Vec<u32>, message: &'static str) -> Self {
            Self { items, message }
        }
    }

    impl Publisher<u32> for Failing {
        fn subscribe(&self, subscriber: Arc<dyn Subscriber<u32>>) {
            subscriber.on_subscribe(Arc::new(Unregulated));
            for item in &self.items {
                subscriber.on_next(*item);
            }
            subscriber.on_error(Error::custom(self.message));
        }
    }

    /// A publisher driven by hand from any thread through its [`Feeder`].
    pub(crate) struct Manual {
        subscriber: Arc<Mutex<Option<Arc<dyn Subscriber<u32>>>>>,
    }

    pub(crate) struct Feeder {
        subscriber: Arc<Mutex<Option<Arc<dyn Subscriber<u32>>>>>,
    }

    impl Manual {
        pub(crate) fn new() -> (Self, Feeder) {
            let subscriber = Arc::new(Mutex::new(None));
            (
                Self {
                    subscriber: Arc::clone(&subscriber),
                },
                Feeder { subscriber },
            )
        }
    }

    impl Publisher<u32> for Manual {
        fn subscribe(&self, subscriber: Arc<dyn Subscriber<u32>>) {
            subscriber.on_subscribe(Arc::new(Unregulated));
            *self.subscriber.lock() = Some(subscriber);
        }
    }

    impl Feeder {
        fn current(&self) -> Option<Arc<dyn Subscriber<u32>>> {
            self.subscriber.lock().clone()
        }

        pub(crate) fn emit(&self, item: u32) {
            if let Some(subscriber) = self.current() {
                subscriber.on_next(item);
            }
        }

        pub(crate) fn complete(&self) {
            if let Some(subscriber) = self.current() {
                subscriber.on_complete();
            }
        }
    }

    #[test]
    fn test_relay_over_range_end_to_end() {
        use crate::error_slot::tests::RecordingSubscriber;
        use crate::stage::BufferedRelay;

        let downstream = RecordingSubscriber::new();
        let relay = BufferedRelay::<u32>::builder(downstream.clone())
            .buffer_size(16)
            .hooks(Hooks::panicking())
            .build();
        let range = Range::new(0, 40);
        range.subscribe(relay.clone());

        let subscription = downstream
            .subscription
            .lock()
            .clone()
            .expect("relay subscribed downstream");
        subscription.request(25);
        assert_eq!(downstream.signals().len(), 25);

        subscription.request(100);
        let signals = downstream.signals();
        assert_eq!(signals.len(), 41);
        assert_eq!(signals.last().map(String::as_str), Some("complete"));
        assert_eq!(range.requests()[0], 16);
    }
}
