use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::SimpleQueue;
use crate::config::Config;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: UnsafeCell<Option<T>>,
}

impl<T> Node<T> {
    fn allocate(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(value),
        }))
    }
}

/// An unbounded multi-producer/single-consumer linked queue.
///
/// A producer allocates a node, swaps it in as the new tail, then links the
/// previous tail to it. Between those two steps the consumer can find the
/// queue non-empty while the head's `next` link is still missing; it spins on
/// that single edge, which the producer that won the swap completes
/// promptly. Past the spin budget ([`Config::max_spin`]) the consumer yields
/// its thread between checks, so a descheduled producer can finish.
///
/// Any number of threads may `offer`; the consumer operations must run on
/// one thread at a time.
pub struct MpscQueue<T> {
    /// Stub node whose successor is the head item. Consumer-owned.
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    max_spin: u32,
}

// SAFETY: values move between threads (T: Send); node links are atomic and
// the value cell of a node is written once before publication and read once
// by the single consumer.
unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> MpscQueue<T> {
    /// A queue with the spin budget from the global [`Config`].
    pub fn new() -> Self {
        Self::with_max_spin(Config::global().max_spin)
    }

    /// A queue whose consumer spins at most `spins` times on a missing link
    /// before yielding.
    pub fn with_max_spin(spins: u32) -> Self {
        let stub = Node::allocate(None);
        Self {
            head: AtomicPtr::new(stub),
            tail: AtomicPtr::new(stub),
            max_spin: spins.max(1),
        }
    }

    pub fn max_spin(&self) -> u32 {
        self.max_spin
    }

    /// Follows the stub's link, waiting out a producer that has swapped the
    /// tail but not yet linked its node.
    fn next_of_head(&self, head: *mut Node<T>) -> *mut Node<T> {
        // SAFETY: the stub is only freed by the consumer.
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        if !next.is_null() || head == self.tail.load(Ordering::Acquire) {
            return next;
        }
        let mut spins = 0u32;
        loop {
            if spins < self.max_spin {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
            // SAFETY: as above.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if !next.is_null() {
                return next;
            }
        }
    }
}

impl<T> Default for MpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> SimpleQueue<T> for MpscQueue<T> {
    fn offer(&self, item: T) -> bool {
        let node = Node::allocate(Some(item));
        let previous = self.tail.swap(node, Ordering::AcqRel);
        // SAFETY: `previous` cannot be freed before its `next` is linked: the
        // consumer never moves past a node whose link is missing.
        unsafe { (*previous).next.store(node, Ordering::Release) };
        true
    }

    fn poll(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let next = self.next_of_head(head);
        if next.is_null() {
            return None;
        }
        // SAFETY: `next` is fully published (Acquire on the link); the
        // consumer is the only reader of its value, and the old stub is no
        // longer reachable from any producer.
        unsafe {
            let item = (*(*next).value.get()).take();
            self.head.store(next, Ordering::Relaxed);
            drop(Box::from_raw(head));
            item
        }
    }

    fn peek_with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let head = self.head.load(Ordering::Relaxed);
        let next = self.next_of_head(head);
        if next.is_null() {
            return None;
        }
        // SAFETY: see `poll`; the value is only read.
        unsafe { (*(*next).value.get()).as_ref().map(f) }
    }

    /// Walks the list; intended for diagnostics, not hot paths.
    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let mut node = self.head.load(Ordering::Acquire);
        let mut count = 0;
        while node != tail {
            // SAFETY: nodes between head and tail are live; a missing link
            // means the item is not yet visible and is not counted.
            let next = unsafe { (*node).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            count += 1;
            node = next;
        }
        count
    }

    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }
}

impl<T> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            // SAFETY: exclusive access; every node is owned by the list.
            let owned = unsafe { Box::from_raw(node) };
            node = owned.next.load(Ordering::Relaxed);
        }
    }
}

impl<T> std::fmt::Debug for MpscQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpscQueue")
            .field("max_spin", &self.max_spin)
            .finish_non_exhaustive()
    }
}
