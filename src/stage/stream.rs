use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use futures_core::stream::{FusedStream, Stream};
use tracing::debug;

use crate::arbiter::SingleArbiter;
use crate::config::{limit_for, Config};
use crate::error::{Error, ProtocolViolation, Result};
use crate::error_slot::{ErrorSlot, Termination};
use crate::hooks::Hooks;
use crate::queue::{SimpleQueue, SpscQueue};
use crate::traits::{Publisher, Subscriber, SubscriptionRef};

/// The subscriber half: fills the queue and wakes the polling task.
struct Shared<T> {
    queue: SpscQueue<T>,
    upstream: SingleArbiter,
    errors: ErrorSlot,
    done: AtomicBool,
    waker: AtomicWaker,
    prefetch: usize,
    hooks: Hooks,
}

impl<T: Send + 'static> Subscriber<T> for Shared<T> {
    fn on_subscribe(&self, subscription: SubscriptionRef) {
        if self.upstream.set(subscription) {
            self.upstream.request(self.prefetch as u64);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        self.queue.offer(item);
        self.waker.wake();
    }

    fn on_error(&self, error: Error) {
        if self.done.load(Ordering::Acquire) {
            self.hooks.on_error(error);
            return;
        }
        self.errors.try_add(error);
        self.done.store(true, Ordering::Release);
        self.waker.wake();
    }

    fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            self.hooks.report_violation(ProtocolViolation::DoubleTerminal);
            return;
        }
        self.waker.wake();
    }
}

/// A [`Stream`] over a [`Publisher`], with prefetch and batched replenishment.
///
/// Items buffered before a failure are yielded first; the failure is then
/// yielded as one `Err` and the stream ends. Dropping the stream cancels
/// the upstream.
pub struct RelayStream<T> {
    shared: Arc<Shared<T>>,
    consumed: usize,
    limit: usize,
    finished: bool,
}

impl<T: Send + 'static> RelayStream<T> {
    fn subscribe<P>(publisher: &P, prefetch: usize, hooks: Hooks) -> Self
    where
        P: Publisher<T> + ?Sized,
    {
        let prefetch = prefetch.max(1);
        let shared = Arc::new(Shared {
            queue: SpscQueue::with_capacity(prefetch),
            upstream: SingleArbiter::with_hooks(hooks.clone()),
            errors: ErrorSlot::with_hooks(hooks.clone()),
            done: AtomicBool::new(false),
            waker: AtomicWaker::new(),
            prefetch,
            hooks,
        });
        publisher.subscribe(shared.clone());
        Self {
            shared,
            consumed: 0,
            limit: limit_for(prefetch),
            finished: false,
        }
    }

    fn next_ready(&mut self) -> Option<Option<Result<T>>> {
        let done = self.shared.done.load(Ordering::Acquire);
        if let Some(item) = self.shared.queue.poll() {
            self.consumed += 1;
            if self.consumed == self.limit {
                self.shared.upstream.request(self.consumed as u64);
                self.consumed = 0;
            }
            return Some(Some(Ok(item)));
        }
        if !done {
            return None;
        }
        self.finished = true;
        match self.shared.errors.terminate() {
            Some(Termination::Failed(error)) => Some(Some(Err(error))),
            _ => Some(None),
        }
    }
}

impl<T: Send + 'static> Stream for RelayStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(ready) = this.next_ready() {
            return Poll::Ready(ready);
        }
        this.shared.waker.register(cx.waker());
        // Re-check: a signal may have landed before the waker was registered.
        match this.next_ready() {
            Some(ready) => Poll::Ready(ready),
            None => Poll::Pending,
        }
    }
}

impl<T: Send + 'static> FusedStream for RelayStream<T> {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl<T> Drop for RelayStream<T> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("relay stream dropped before completion");
        }
        self.shared.upstream.cancel();
    }
}

impl<T> std::fmt::Debug for RelayStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("limit", &self.limit)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Subscribes to `publisher` and exposes it as a [`Stream`].
pub fn into_stream<T, P>(publisher: &P, buffer_size: usize) -> RelayStream<T>
where
    T: Send + 'static,
    P: Publisher<T> + ?Sized,
{
    RelayStream::subscribe(publisher, buffer_size, Hooks::global())
}

/// Extension methods for publishers.
#[allow(clippy::wrong_self_convention)]
pub trait PublisherExt<T>: Publisher<T> {
    /// Consume this publisher as a [`Stream`] with the global buffer size.
    fn into_stream(&self) -> RelayStream<T>
    where
        T: Send + 'static,
    {
        into_stream(self, Config::global().buffer_size)
    }

    /// Consume this publisher as a [`Stream`] with the given buffer size and hooks.
    fn into_stream_with(&self, buffer_size: usize, hooks: Hooks) -> RelayStream<T>
    where
        T: Send + 'static,
    {
        RelayStream::subscribe(self, buffer_size, hooks)
    }
}

impl<T, P: Publisher<T> + ?Sized> PublisherExt<T> for P {}

#[cfg(test)]
mod tests {
    use std::thread;

    use futures::StreamExt;

    use super::*;
    use crate::stage::tests::{Failing, Range};

    #[tokio::test]
    async fn test_collects_range_with_replenishment() {
        let range = Range::new(0, 100);
        let stream = range.into_stream_with(16, Hooks::panicking());
        let items: Vec<u32> = stream.map(|item| item.unwrap()).collect().await;

        assert_eq!(items, (0..100).collect::<Vec<_>>());
        // 16 up front, then 12 at a time.
        let requests = range.requests();
        assert_eq!(requests[0], 16);
        assert!(requests[1..].iter().all(|n| *n == 12));
    }

    #[tokio::test]
    async fn test_failure_after_buffered_items() {
        let source = Failing::new(vec![1, 2], "broken");
        let mut stream = source.into_stream_with(16, Hooks::panicking());

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        let error = stream.next().await.unwrap().unwrap_err();
        assert_eq!(error.to_string(), "broken");
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
    }

    #[tokio::test]
    async fn test_drop_cancels_upstream() {
        let range = Range::new(0, 1_000);
        let mut stream = range.into_stream_with(16, Hooks::panicking());
        assert_eq!(stream.next().await.unwrap().unwrap(), 0);
        drop(stream);
        assert!(range.is_cancelled());
    }

    #[test]
    fn test_pending_until_an_item_arrives() {
        let (publisher, feeder) = crate::stage::tests::Manual::new();
        let mut stream = publisher.into_stream_with(16, Hooks::panicking());

        let mut next = tokio_test::task::spawn(stream.next());
        tokio_test::assert_pending!(next.poll());
        feeder.emit(5);
        assert!(next.is_woken());
        let item = tokio_test::assert_ready!(next.poll());
        assert_eq!(item.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_items_from_another_thread_wake_the_task() {
        let (publisher, feeder) = crate::stage::tests::Manual::new();
        let stream = publisher.into_stream_with(64, Hooks::panicking());

        let producer = thread::spawn(move || {
            for i in 0..50u32 {
                feeder.emit(i);
            }
            feeder.complete();
        });

        let items: Vec<u32> = stream.map(|item| item.unwrap()).collect().await;
        producer.join().unwrap();
        assert_eq!(items, (0..50).collect::<Vec<_>>());
    }
}
