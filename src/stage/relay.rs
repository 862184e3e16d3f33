use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::arbiter::SingleArbiter;
use crate::config::{limit_for, Config};
use crate::demand::DemandCounter;
use crate::drain::WorkCoordinator;
use crate::error::{Error, ProtocolViolation};
use crate::error_slot::ErrorSlot;
use crate::hooks::Hooks;
use crate::queue::{SimpleQueue, SpscQueue};
use crate::scheduler::SchedulerRef;
use crate::traits::{Subscriber, Subscription, SubscriptionRef};

/// Builder for [`BufferedRelay`].
pub struct RelayBuilder<T> {
    downstream: Arc<dyn Subscriber<T>>,
    buffer_size: usize,
    scheduler: Option<SchedulerRef>,
    delay_errors: bool,
    hooks: Option<Hooks>,
}

impl<T: Send + 'static> RelayBuilder<T> {
    /// Prefetch amount requested from upstream up front.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Drain on `scheduler` instead of the signalling thread.
    pub fn scheduler(mut self, scheduler: SchedulerRef) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Deliver queued items before a failure instead of cutting ahead of them.
    pub fn delay_errors(mut self, delay: bool) -> Self {
        self.delay_errors = delay;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Arc<BufferedRelay<T>> {
        let hooks = self.hooks.unwrap_or_else(Hooks::global);
        let prefetch = self.buffer_size;
        Arc::new_cyclic(|this| BufferedRelay {
            this: this.clone(),
            downstream: self.downstream,
            upstream: SingleArbiter::with_hooks(hooks.clone()),
            queue: SpscQueue::with_capacity(prefetch),
            wip: WorkCoordinator::new(),
            requested: DemandCounter::new(),
            emitted: AtomicU64::new(0),
            consumed: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            errors: ErrorSlot::with_hooks(hooks.clone()),
            prefetch,
            limit: limit_for(prefetch),
            scheduler: self.scheduler,
            delay_errors: self.delay_errors,
            hooks,
        })
    }
}

/// A buffering hop between a producer and a downstream subscriber.
///
/// Upstream items land in an SPSC queue; a drain loop serialized by a
/// [`WorkCoordinator`] hands them downstream no faster than downstream
/// demand allows, optionally on a [`Scheduler`](crate::scheduler::Scheduler).
/// Upstream is asked for `buffer_size` items up front and replenished in
/// batches of three quarters of that once consumed.
///
/// The relay is both the upstream's [`Subscriber`] and the downstream's
/// [`Subscription`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use fluxweld::stage::BufferedRelay;
/// use fluxweld::traits::{Subscriber, SubscriptionRef};
/// use fluxweld::Error;
///
/// struct Print;
///
/// impl Subscriber<u32> for Print {
///     fn on_subscribe(&self, subscription: SubscriptionRef) {
///         subscription.request(u64::MAX);
///     }
///     fn on_next(&self, item: u32) {
///         println!("{item}");
///     }
///     fn on_error(&self, _error: Error) {}
///     fn on_complete(&self) {}
/// }
///
/// let relay = BufferedRelay::<u32>::builder(Arc::new(Print)).buffer_size(16).build();
/// assert_eq!(relay.buffer_size(), 16);
/// ```
pub struct BufferedRelay<T> {
    this: Weak<BufferedRelay<T>>,
    downstream: Arc<dyn Subscriber<T>>,
    upstream: SingleArbiter,
    queue: SpscQueue<T>,
    wip: WorkCoordinator,
    /// Cumulative downstream demand.
    requested: DemandCounter,
    /// Cumulative items emitted; only the drain touches it.
    emitted: AtomicU64,
    /// Items taken since the last replenishment; only the drain touches it.
    consumed: AtomicUsize,
    done: AtomicBool,
    errors: ErrorSlot,
    prefetch: usize,
    limit: usize,
    scheduler: Option<SchedulerRef>,
    delay_errors: bool,
    hooks: Hooks,
}

impl<T: Send + 'static> BufferedRelay<T> {
    pub fn builder(downstream: Arc<dyn Subscriber<T>>) -> RelayBuilder<T> {
        RelayBuilder {
            downstream,
            buffer_size: Config::global().buffer_size,
            scheduler: None,
            delay_errors: false,
            hooks: None,
        }
    }

    /// A relay with the global configuration, draining on the calling thread.
    pub fn new(downstream: Arc<dyn Subscriber<T>>) -> Arc<Self> {
        Self::builder(downstream).build()
    }

    pub fn buffer_size(&self) -> usize {
        self.prefetch
    }

    /// Items waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.wip.is_cancelled()
    }

    fn schedule(&self) {
        if !self.wip.enter() {
            return;
        }
        match &self.scheduler {
            Some(scheduler) => {
                let Some(this) = self.this.upgrade() else {
                    return;
                };
                scheduler.schedule(Box::new(move || this.drain_loop()));
            }
            None => self.drain_loop(),
        }
    }

    fn drain_loop(&self) {
        let mut missed = 1;
        let mut emitted = self.emitted.load(Ordering::Relaxed);
        let mut consumed = self.consumed.load(Ordering::Relaxed);

        loop {
            let requested = self.requested.get();

            while emitted != requested {
                let done = self.done.load(Ordering::Acquire);
                let item = self.queue.poll();
                let empty = item.is_none();

                if self.check_terminated(done, empty) {
                    return;
                }
                let Some(item) = item else {
                    break;
                };

                self.downstream.on_next(item);
                emitted += 1;
                consumed += 1;
                if consumed == self.limit {
                    trace!(batch = consumed, "replenishing upstream demand");
                    self.upstream.request(consumed as u64);
                    consumed = 0;
                }
            }

            if emitted == requested
                && self.check_terminated(self.done.load(Ordering::Acquire), self.queue.is_empty())
            {
                return;
            }

            self.emitted.store(emitted, Ordering::Relaxed);
            self.consumed.store(consumed, Ordering::Relaxed);
            missed = self.wip.leave_missed(missed);
            if missed == 0 {
                return;
            }
        }
    }

    fn check_terminated(&self, done: bool, empty: bool) -> bool {
        if self.wip.is_cancelled() {
            self.queue.clear();
            return true;
        }
        if !done {
            return false;
        }
        if self.errors.has_error() && !self.delay_errors {
            self.queue.clear();
            self.errors.try_terminate_subscriber::<T, _>(&*self.downstream);
            return true;
        }
        if empty {
            self.errors.try_terminate_subscriber::<T, _>(&*self.downstream);
            return true;
        }
        false
    }
}

impl<T: Send + 'static> Subscriber<T> for BufferedRelay<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.done.load(Ordering::Acquire) {
            subscription.cancel();
            self.hooks
                .report_violation(ProtocolViolation::OnSubscribeAfterTerminal);
            return;
        }
        if !self.upstream.set(subscription) {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        debug!(prefetch = self.prefetch, "relay subscribed");
        self.downstream.on_subscribe(this);
        self.upstream.request(self.prefetch as u64);
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        self.queue.offer(item);
        self.schedule();
    }

    fn on_error(&self, error: Error) {
        if self.done.load(Ordering::Acquire) {
            self.hooks.on_error(error);
            return;
        }
        self.errors.try_add(error);
        self.done.store(true, Ordering::Release);
        self.schedule();
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            self.hooks.report_violation(ProtocolViolation::DoubleTerminal);
            return;
        }
        self.schedule();
    }
}

impl<T: Send + 'static> Subscription for BufferedRelay<T> {
    fn request(&self, n: u64) {
        if !self.hooks.validate_request(n) {
            return;
        }
        self.requested.request(n);
        self.schedule();
    }

    fn cancel(&self) {
        if !self.wip.cancel() {
            return;
        }
        debug!("relay cancelled");
        self.upstream.cancel();
        // Claim the drain for good; whoever gets it empties the buffer.
        if self.wip.enter() {
            self.queue.clear();
        }
    }
}

impl<T> std::fmt::Debug for BufferedRelay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedRelay")
            .field("prefetch", &self.prefetch)
            .field("limit", &self.limit)
            .field("done", &self.done.load(Ordering::Relaxed))
            .field("cancelled", &self.wip.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::arbiter::tests::RecordingSubscription;
    use crate::demand::UNBOUNDED;
    use crate::error_slot::tests::RecordingSubscriber;
    use crate::scheduler::TokioScheduler;

    fn subscribed(
        buffer_size: usize,
    ) -> (
        Arc<BufferedRelay<u32>>,
        Arc<RecordingSubscriber>,
        Arc<RecordingSubscription>,
    ) {
        let downstream = RecordingSubscriber::new();
        let relay = BufferedRelay::<u32>::builder(downstream.clone())
            .buffer_size(buffer_size)
            .hooks(Hooks::panicking())
            .build();
        let upstream = RecordingSubscription::new();
        relay.on_subscribe(upstream.clone());
        (relay, downstream, upstream)
    }

    fn downstream_subscription(downstream: &RecordingSubscriber) -> SubscriptionRef {
        downstream
            .subscription
            .lock()
            .clone()
            .expect("downstream was subscribed")
    }

    #[test]
    fn test_emits_no_more_than_requested() {
        let (relay, downstream, upstream) = subscribed(16);
        assert_eq!(upstream.requests(), vec![16]);

        for i in 0..5 {
            relay.on_next(i);
        }
        assert!(downstream.signals().is_empty());
        assert_eq!(relay.buffered(), 5);

        let subscription = downstream_subscription(&downstream);
        subscription.request(3);
        assert_eq!(downstream.signals(), vec!["0", "1", "2"]);

        subscription.request(10);
        assert_eq!(downstream.signals(), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(relay.buffered(), 0);
    }

    #[test]
    fn test_replenishes_in_batches() {
        let (relay, downstream, upstream) = subscribed(16);
        downstream_subscription(&downstream).request(UNBOUNDED);

        for i in 0..12 {
            relay.on_next(i);
        }
        // 16 - 16/4 = 12 consumed triggers one batch.
        assert_eq!(upstream.requests(), vec![16, 12]);

        for i in 12..20 {
            relay.on_next(i);
        }
        assert_eq!(upstream.requests(), vec![16, 12]);
    }

    #[test]
    fn test_complete_waits_for_buffer() {
        let (relay, downstream, _upstream) = subscribed(16);
        relay.on_next(1);
        relay.on_next(2);
        relay.on_complete();
        assert!(downstream.signals().is_empty());

        let subscription = downstream_subscription(&downstream);
        subscription.request(1);
        assert_eq!(downstream.signals(), vec!["1"]);
        subscription.request(1);
        assert_eq!(downstream.signals(), vec!["1", "2", "complete"]);
    }

    #[test]
    fn test_error_cuts_ahead_of_buffer() {
        let (relay, downstream, _upstream) = subscribed(16);
        relay.on_next(1);
        relay.on_error(Error::custom("boom"));

        assert_eq!(downstream.signals(), vec!["error"]);
        assert_eq!(relay.buffered(), 0);
    }

    #[test]
    fn test_delayed_error_follows_buffer() {
        let downstream = RecordingSubscriber::new();
        let relay = BufferedRelay::<u32>::builder(downstream.clone())
            .buffer_size(16)
            .delay_errors(true)
            .hooks(Hooks::panicking())
            .build();
        relay.on_subscribe(RecordingSubscription::new());
        relay.on_next(7u32);
        relay.on_error(Error::custom("boom"));
        assert!(downstream.signals().is_empty());

        downstream_subscription(&downstream).request(1);
        assert_eq!(downstream.signals(), vec!["7", "error"]);
    }

    #[test]
    fn test_cancel_stops_delivery_and_upstream() {
        let (relay, downstream, upstream) = subscribed(16);
        relay.on_next(1);
        let subscription = downstream_subscription(&downstream);
        subscription.cancel();
        subscription.request(5);

        assert!(upstream.is_cancelled());
        assert!(relay.is_cancelled());
        assert!(downstream.signals().is_empty());
        assert_eq!(relay.buffered(), 0);
    }

    #[test]
    fn test_protocol_breaches_are_reported() {
        let (hooks, sink) = Hooks::recording();
        let downstream = RecordingSubscriber::new();
        let relay = BufferedRelay::<u32>::builder(downstream.clone())
            .hooks(hooks)
            .build();
        let first = RecordingSubscription::new();
        let second = RecordingSubscription::new();
        relay.on_subscribe(first.clone());
        relay.on_subscribe(second.clone());
        relay.on_complete();
        relay.on_complete();
        relay.on_error(Error::custom("late"));

        assert!(second.is_cancelled());
        let recorded: Vec<_> = sink.lock().iter().map(|e| e.as_violation()).collect();
        assert_eq!(
            recorded,
            vec![
                Some(ProtocolViolation::SubscriptionAlreadySet),
                Some(ProtocolViolation::DoubleTerminal),
                None,
            ]
        );
        assert_eq!(downstream.signals(), vec!["complete"]);
    }

    struct ChannelSubscriber {
        tx: mpsc::UnboundedSender<Option<u32>>,
        subscription: Mutex<Option<SubscriptionRef>>,
    }

    impl Subscriber<u32> for ChannelSubscriber {
        fn on_subscribe(&self, subscription: SubscriptionRef) {
            subscription.request(UNBOUNDED);
            *self.subscription.lock() = Some(subscription);
        }

        fn on_next(&self, item: u32) {
            let _ = self.tx.send(Some(item));
        }

        fn on_error(&self, _error: Error) {}

        fn on_complete(&self) {
            let _ = self.tx.send(None);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drains_on_scheduler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let downstream = Arc::new(ChannelSubscriber {
            tx,
            subscription: Mutex::new(None),
        });
        let relay = BufferedRelay::<u32>::builder(downstream)
            .buffer_size(16)
            .scheduler(TokioScheduler::current().unwrap().shared())
            .hooks(Hooks::panicking())
            .build();

        relay.on_subscribe(RecordingSubscription::new());
        for i in 0..100 {
            relay.on_next(i);
        }
        relay.on_complete();

        let mut received = Vec::new();
        while let Ok(Some(signal)) =
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
        {
            match signal {
                Some(item) => received.push(item),
                None => break,
            }
        }
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }
}
