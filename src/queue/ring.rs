//! Linked ring segments shared by the single-producer queues.
//!
//! Items live in power-of-two rings ("segments"). Each slot carries a state
//! word, so the producer can tell a free slot from a live one without
//! comparing indices. The upper bits of a live slot's state count the shared
//! peekers pinning it; the consumer waits for that count to reach zero
//! before taking the item.
//!
//! When the producer finds its next slot still occupied, the current segment
//! is full. Instead of copying live items (which would race the consumer),
//! the producer allocates a new segment, writes the item there, records the
//! absolute index at which the old segment was sealed and links the new one.
//! The consumer drains the old segment up to the seal and then hops.
//!
//! Absolute producer and consumer indices are kept in atomics so that
//! `len`/`is_empty` can be answered from any thread.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::metrics;

const EMPTY: usize = 0;
const FULL: usize = 1;
const TAKING: usize = 2;
const STATE_MASK: usize = 0b11;
/// One shared peeker pinning a FULL slot.
const READER: usize = 0b100;

#[inline]
fn is_full(state: usize) -> bool {
    state & STATE_MASK == FULL
}

struct Slot<T> {
    state: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Segment<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    next: AtomicPtr<Segment<T>>,
    /// Absolute index from which items live in `next`. Written before `next`.
    sealed_at: AtomicUsize,
}

impl<T> Segment<T> {
    fn allocate(capacity: usize) -> *mut Segment<T> {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| Slot {
                state: AtomicUsize::new(EMPTY),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Box::into_raw(Box::new(Segment {
            slots,
            mask: capacity - 1,
            next: AtomicPtr::new(ptr::null_mut()),
            sealed_at: AtomicUsize::new(usize::MAX),
        }))
    }

    #[inline]
    fn slot(&self, index: usize) -> &Slot<T> {
        &self.slots[index & self.mask]
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// How a full segment is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Growth {
    /// Each new segment doubles the previous capacity.
    Double,
    /// Every segment has the same capacity.
    Fixed,
}

pub(crate) struct SegmentedRing<T> {
    producer_index: AtomicUsize,
    consumer_index: AtomicUsize,
    /// Only touched by the producer.
    producer_segment: AtomicPtr<Segment<T>>,
    /// Written by the consumer; read by shared peekers.
    consumer_segment: AtomicPtr<Segment<T>>,
    growth: Growth,
    growths: AtomicUsize,
    /// Capacity of the producer segment, readable from any thread.
    capacity: AtomicUsize,
    name: &'static str,
    peekers: AtomicUsize,
    /// Segments the consumer left while a shared peeker was active.
    retired: Mutex<Vec<*mut Segment<T>>>,
}

// SAFETY: items are moved between threads (T: Send). Slot access is
// coordinated through the per-slot state markers and the single-producer /
// single-consumer contract documented on each public queue.
unsafe impl<T: Send> Send for SegmentedRing<T> {}
unsafe impl<T: Send> Sync for SegmentedRing<T> {}

impl<T> SegmentedRing<T> {
    pub(crate) fn new(capacity: usize, growth: Growth, name: &'static str) -> Self {
        let segment = Segment::allocate(capacity);
        // SAFETY: freshly allocated and owned by the ring.
        let capacity = unsafe { (*segment).capacity() };
        Self {
            producer_index: AtomicUsize::new(0),
            consumer_index: AtomicUsize::new(0),
            producer_segment: AtomicPtr::new(segment),
            consumer_segment: AtomicPtr::new(segment),
            growth,
            growths: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
            name,
            peekers: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Producer side. Never fails.
    pub(crate) fn offer(&self, item: T) {
        let index = self.producer_index.load(Ordering::Relaxed);
        // SAFETY: the producer segment is only replaced by the producer and
        // is never freed while it is the producer's target.
        let segment = unsafe { &*self.producer_segment.load(Ordering::Relaxed) };
        let slot = segment.slot(index);

        if slot.state.load(Ordering::Acquire) == EMPTY {
            // SAFETY: an EMPTY slot is owned by the producer until it is
            // published as FULL.
            unsafe { (*slot.value.get()).write(item) };
            slot.state.store(FULL, Ordering::Release);
        } else {
            self.grow(segment, index, item);
        }

        self.producer_index.store(index + 1, Ordering::Release);
    }

    fn grow(&self, full: &Segment<T>, index: usize, item: T) {
        let capacity = match self.growth {
            Growth::Double => full.capacity() * 2,
            Growth::Fixed => full.capacity(),
        };
        let next_ptr = Segment::allocate(capacity);
        // SAFETY: freshly allocated and not yet visible to anyone else.
        let next = unsafe { &*next_ptr };
        let slot = next.slot(index);
        // SAFETY: as above, the new segment is private until linked.
        unsafe { (*slot.value.get()).write(item) };
        slot.state.store(FULL, Ordering::Relaxed);

        full.sealed_at.store(index, Ordering::Relaxed);
        full.next.store(next_ptr, Ordering::Release);
        self.producer_segment.store(next_ptr, Ordering::Relaxed);
        self.capacity.store(next.capacity(), Ordering::Relaxed);

        let growths = self.growths.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(queue = self.name, capacity = next.capacity(), growths, "queue segment linked");
        metrics::record_queue_growth(self.name);
    }

    /// Consumer side.
    pub(crate) fn poll(&self) -> Option<T> {
        let index = self.consumer_index.load(Ordering::Relaxed);
        let mut segment = self.consumer_segment.load(Ordering::Relaxed);
        loop {
            // SAFETY: the consumer segment is freed only by the consumer,
            // after it has hopped past it.
            let current = unsafe { &*segment };
            let slot = current.slot(index);

            if self.acquire_for_take(slot) {
                // SAFETY: TAKING gives the consumer exclusive access to a slot
                // the producer published as FULL.
                let item = unsafe { (*slot.value.get()).assume_init_read() };
                slot.state.store(EMPTY, Ordering::Release);
                self.consumer_index.store(index + 1, Ordering::Release);
                return Some(item);
            }

            match self.advance(current, index) {
                Advance::Empty => return None,
                Advance::Retry => continue,
                Advance::Hop(next) => {
                    self.hop(segment, next);
                    segment = next;
                }
            }
        }
    }

    /// Consumer side. Inspects the head without removing it.
    pub(crate) fn peek_with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let index = self.consumer_index.load(Ordering::Relaxed);
        let mut segment = self.consumer_segment.load(Ordering::Relaxed);
        loop {
            // SAFETY: see `poll`.
            let current = unsafe { &*segment };
            let slot = current.slot(index);
            if is_full(slot.state.load(Ordering::Acquire)) {
                // SAFETY: a published slot is not overwritten until the
                // consumer (us) empties it; shared peekers only read.
                return Some(f(unsafe { (*slot.value.get()).assume_init_ref() }));
            }
            match self.advance(current, index) {
                Advance::Empty => return None,
                Advance::Retry => continue,
                Advance::Hop(next) => {
                    self.hop(segment, next);
                    segment = next;
                }
            }
        }
    }

    /// Any thread. Pins the head slot while `f` runs.
    pub(crate) fn peek_shared<R, F>(&self, f: F) -> Option<R>
    where
        T: Sync,
        F: FnOnce(&T) -> R,
    {
        self.peekers.fetch_add(1, Ordering::SeqCst);
        let result = self.peek_pinned(f);
        self.peekers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn peek_pinned<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        'retry: loop {
            let index = self.consumer_index.load(Ordering::SeqCst);
            let mut segment = self.consumer_segment.load(Ordering::SeqCst);
            loop {
                // SAFETY: while `peekers` is non-zero the consumer retires
                // segments instead of freeing them.
                let current = unsafe { &*segment };
                let slot = current.slot(index);
                let state = slot.state.load(Ordering::Acquire);
                if is_full(state) {
                    if slot
                        .state
                        .compare_exchange_weak(
                            state,
                            state + READER,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                    {
                        // Another peeker joined or left; look again.
                        continue;
                    }
                    if self.consumer_index.load(Ordering::SeqCst) != index {
                        // The slot was recycled for a later item.
                        slot.state.fetch_sub(READER, Ordering::Release);
                        continue 'retry;
                    }
                    // SAFETY: a non-zero reader count blocks the consumer
                    // from taking the slot.
                    let result = f(unsafe { (*slot.value.get()).assume_init_ref() });
                    slot.state.fetch_sub(READER, Ordering::Release);
                    return Some(result);
                }

                if self.consumer_index.load(Ordering::SeqCst) != index {
                    continue 'retry;
                }
                let next = current.next.load(Ordering::Acquire);
                if !next.is_null() && index >= current.sealed_at.load(Ordering::Relaxed) {
                    segment = next;
                    continue;
                }
                return None;
            }
        }
    }

    /// Consumer side. Discards the head.
    pub(crate) fn drop_head(&self) -> bool {
        self.poll().is_some()
    }

    pub(crate) fn len(&self) -> usize {
        let consumed = self.consumer_index.load(Ordering::Acquire);
        let produced = self.producer_index.load(Ordering::Acquire);
        // The consumer may publish its index before the producer does.
        produced.saturating_sub(consumed)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn growths(&self) -> usize {
        self.growths.load(Ordering::Relaxed)
    }

    pub(crate) fn segment_capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    fn acquire_for_take(&self, slot: &Slot<T>) -> bool {
        loop {
            match slot
                .state
                .compare_exchange_weak(FULL, TAKING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                // Pinned by shared peekers, or a spurious failure.
                Err(state) if is_full(state) => std::hint::spin_loop(),
                Err(_) => return false,
            }
        }
    }

    fn advance(&self, current: &Segment<T>, index: usize) -> Advance<T> {
        let next = current.next.load(Ordering::Acquire);
        if next.is_null() {
            return Advance::Empty;
        }
        if index < current.sealed_at.load(Ordering::Relaxed) {
            // Published before the seal; now visible through `next`.
            return Advance::Retry;
        }
        Advance::Hop(next)
    }

    fn hop(&self, old: *mut Segment<T>, next: *mut Segment<T>) {
        self.consumer_segment.store(next, Ordering::SeqCst);
        if self.peekers.load(Ordering::SeqCst) == 0 {
            let retired = std::mem::take(&mut *self.retired.lock());
            for segment in retired.into_iter().chain(std::iter::once(old)) {
                // SAFETY: no peeker can observe a segment older than the
                // current consumer segment, and the producer moved on.
                drop(unsafe { Box::from_raw(segment) });
            }
        } else {
            self.retired.lock().push(old);
        }
    }
}

enum Advance<T> {
    Empty,
    Retry,
    Hop(*mut Segment<T>),
}

impl<T> Drop for SegmentedRing<T> {
    fn drop(&mut self) {
        while self.poll().is_some() {}

        let mut segment = *self.consumer_segment.get_mut();
        while !segment.is_null() {
            // SAFETY: exclusive access; every remaining segment is reachable
            // once from the consumer segment.
            let owned = unsafe { Box::from_raw(segment) };
            segment = owned.next.load(Ordering::Relaxed);
        }
        for segment in self.retired.get_mut().drain(..) {
            // SAFETY: retired segments are unreachable from the live chain.
            drop(unsafe { Box::from_raw(segment) });
        }
    }
}
