use super::ring::{Growth, SegmentedRing};
use super::SimpleQueue;
use crate::config::Config;

/// A growable single-producer/single-consumer queue.
///
/// When the producer catches up with the consumer, a segment of twice the
/// previous capacity is linked in; live items stay where they are and the
/// consumer moves over once it has drained them. `offer` therefore never
/// fails.
///
/// `offer` must only be called from one thread at a time, and the consumer
/// operations (`poll`, `peek_with`, `drop_head`, `clear`) from one thread at
/// a time. `len` and `is_empty` may be called from anywhere.
///
/// # Example
///
/// ```rust
/// use fluxweld::queue::{SimpleQueue, SpscQueue};
///
/// let queue = SpscQueue::with_capacity(8);
/// for i in 0..9 {
///     queue.offer(i);
/// }
/// assert_eq!(queue.growths(), 1);
///
/// let drained: Vec<_> = std::iter::from_fn(|| queue.poll()).collect();
/// assert_eq!(drained, (0..9).collect::<Vec<_>>());
/// ```
pub struct SpscQueue<T> {
    ring: SegmentedRing<T>,
}

impl<T> SpscQueue<T> {
    /// A queue whose first segment comes from the global [`Config`].
    pub fn new() -> Self {
        Self::with_capacity(Config::global().queue_initial_capacity)
    }

    /// A queue whose first segment holds `capacity` items (rounded up to a
    /// power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: SegmentedRing::new(capacity, Growth::Double, "spsc"),
        }
    }

    /// Number of times a larger segment was linked in.
    pub fn growths(&self) -> usize {
        self.ring.growths()
    }

    /// Capacity of the segment the producer is writing to.
    pub fn capacity(&self) -> usize {
        self.ring.segment_capacity()
    }
}

impl<T> Default for SpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> SimpleQueue<T> for SpscQueue<T> {
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

    fn drop_head(&self) -> bool {
        self.ring.drop_head()
    }
}

impl<T> std::fmt::Debug for SpscQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscQueue")
            .field("len", &self.ring.len())
            .field("capacity", &self.capacity())
            .field("growths", &self.growths())
            .finish()
    }
}
