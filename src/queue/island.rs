use super::ring::{Growth, SegmentedRing};
use super::SimpleQueue;
use crate::config::Config;

/// A single-producer/single-consumer queue made of fixed-size islands.
///
/// Growth links another island of the same size, so the cost of growing is
/// bounded by the island size rather than by the total number of queued
/// items. Same threading contract as [`SpscQueue`](super::SpscQueue).
pub struct IslandQueue<T> {
    ring: SegmentedRing<T>,
}

impl<T> IslandQueue<T> {
    /// A queue with the island size from the global [`Config`].
    pub fn new() -> Self {
        Self::with_island_size(Config::global().island_size)
    }

    /// A queue with islands of `size` slots (rounded up to a power of two).
    pub fn with_island_size(size: usize) -> Self {
        Self {
            ring: SegmentedRing::new(size, Growth::Fixed, "island"),
        }
    }

    /// Number of islands linked in after the first.
    pub fn growths(&self) -> usize {
        self.ring.growths()
    }

    /// Slot count of each island.
    pub fn island_size(&self) -> usize {
        self.ring.segment_capacity()
    }
}

impl<T> Default for IslandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> SimpleQueue<T> for IslandQueue<T> {
    fn offer(&self, item: T) -> bool {
        self.ring.offer(item);
        true
    }

    fn poll(&self) -> Option<T> {
        self.ring.poll()
    }

    fn peek_with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        self.ring.peek_with(f)
    }

    fn len(&self) -> usize {
        self.ring.len()
    }
}

/// An island queue whose head may be inspected from any thread.
///
/// Each slot's state marker doubles as a "used" flag: a peeker pins the head
/// slot while it looks at it, and the consumer waits for the pin to be
/// released before taking the item. Islands the consumer leaves while a
/// peek is in flight are retired rather than freed, so a peeker never reads
/// released memory.
///
/// `offer` is single-producer and `poll` single-consumer, as for
/// [`IslandQueue`]; [`peek_shared`](Self::peek_shared) has no such
/// restriction.
pub struct SlottedIslandQueue<T> {
    ring: SegmentedRing<T>,
}

impl<T> SlottedIslandQueue<T> {
    pub fn new() -> Self {
        Self::with_island_size(Config::global().island_size)
    }

    pub fn with_island_size(size: usize) -> Self {
        Self {
            ring: SegmentedRing::new(size, Growth::Fixed, "slotted_island"),
        }
    }

    /// Runs `f` on the current head from any thread, without consuming it.
    ///
    /// The answer is a snapshot: the head may be taken right after `f`
    /// returns.
    pub fn peek_shared<R, F>(&self, f: F) -> Option<R>
    where
        T: Sync,
        F: FnOnce(&T) -> R,
    {
        self.ring.peek_shared(f)
    }

    pub fn growths(&self) -> usize {
        self.ring.growths()
    }
}

impl<T> Default for SlottedIslandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> SimpleQueue<T> for SlottedIslandQueue<T> {
    fn offer(&self, item: T) -> bool {
        self.ring.offer(item);
        true
    }

    fn poll(&self) -> Option<T> {
        self.ring.poll()
    }

    fn peek_with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        self.ring.peek_with(f)
    }

    fn len(&self) -> usize {
        self.ring.len()
    }
}
