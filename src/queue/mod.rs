//! Non-blocking queues between a producer and a serialized consumer.
//!
//! - [`SpscQueue`]: growable single-producer/single-consumer queue; each new
//!   segment doubles in size, so `offer` never fails
//! - [`IslandQueue`]: the same, but grows by fixed-size "islands", bounding
//!   the cost of any single growth
//! - [`SlottedIslandQueue`]: an island queue whose head can be peeked from
//!   any thread without consuming it
//! - [`MpscQueue`]: unbounded multi-producer/single-consumer linked queue
//!
//! "Single consumer" means one thread at a time: in a stage, the consumer is
//! whichever thread currently holds the [`WorkCoordinator`](crate::drain::WorkCoordinator).

mod island;
mod mpsc;
mod ring;
mod spsc;

pub use island::{IslandQueue, SlottedIslandQueue};
pub use mpsc::MpscQueue;
pub use spsc::SpscQueue;

/// Common surface of the substrate queues.
///
/// `offer` is the producer operation; `poll`, `peek_with`, `drop_head` and
/// `clear` are consumer operations.
pub trait SimpleQueue<T>: Send + Sync {
    /// Enqueues `item`. Unbounded queues always return `true`.
    fn offer(&self, item: T) -> bool;

    /// Dequeues the head.
    fn poll(&self) -> Option<T>;

    /// Runs `f` on the head without removing it.
    fn peek_with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
        Self: Sized;

    /// Number of items between the consumer and producer positions.
    fn len(&self) -> usize;

    /// Whether [`len`](Self::len) is zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards the head without returning it.
    ///
    /// Used after a terminal check has decided the head is stale.
    fn drop_head(&self) -> bool {
        self.poll().is_some()
    }

    /// Polls until empty.
    fn clear(&self) {
        while self.poll().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Offer(u32),
        Poll,
    }

    fn ops() -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(
            prop_oneof![any::<u32>().prop_map(Op::Offer), Just(Op::Poll)],
            0..256,
        )
    }

    fn check_against_model<Q: SimpleQueue<u32>>(queue: Q, ops: Vec<Op>) -> Result<(), TestCaseError> {
        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Op::Offer(v) => {
                    prop_assert!(queue.offer(v));
                    model.push_back(v);
                }
                Op::Poll => prop_assert_eq!(queue.poll(), model.pop_front()),
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert_eq!(queue.is_empty(), model.is_empty());
            prop_assert_eq!(queue.peek_with(|v| *v), model.front().copied());
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn property_spsc_matches_vecdeque(ops in ops()) {
            check_against_model(SpscQueue::with_capacity(2), ops)?;
        }

        #[test]
        fn property_island_matches_vecdeque(ops in ops()) {
            check_against_model(IslandQueue::with_island_size(4), ops)?;
        }

        #[test]
        fn property_slotted_matches_vecdeque(ops in ops()) {
            check_against_model(SlottedIslandQueue::with_island_size(4), ops)?;
        }

        #[test]
        fn property_mpsc_matches_vecdeque(ops in ops()) {
            check_against_model(MpscQueue::new(), ops)?;
        }
    }
}
