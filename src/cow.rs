//! Copy-on-write arrays of subscribers.
//!
//! Broadcasting stages iterate their subscriber list on every item but change
//! it only on subscribe and cancel. Both arrays here publish immutable
//! snapshots: readers grab the current one and iterate it without holding
//! anything, writers copy, modify and swap. [`CowArray`] swaps with a
//! compare-and-swap loop; [`LockedCowArray`] takes a short lock instead,
//! which behaves better when many writers collide.

use std::ops::Deref;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

struct Inner<T> {
    items: Vec<T>,
    terminated: bool,
}

impl<T> Inner<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            items: Vec::new(),
            terminated: false,
        })
    }
}

/// An immutable view of an array at one point in time.
pub struct Snapshot<T>(Arc<Inner<T>>);

impl<T> Snapshot<T> {
    /// Whether the array was terminated when this snapshot was taken.
    pub fn is_terminated(&self) -> bool {
        self.0.terminated
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0.items
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

fn with_added<T: Clone>(current: &Inner<T>, item: &T) -> Option<Inner<T>> {
    if current.terminated {
        return None;
    }
    let mut items = Vec::with_capacity(current.items.len() + 1);
    items.extend_from_slice(&current.items);
    items.push(item.clone());
    Some(Inner {
        items,
        terminated: false,
    })
}

fn without<T: Clone, P>(current: &Inner<T>, predicate: &P) -> Option<Inner<T>>
where
    P: Fn(&T) -> bool,
{
    if current.terminated {
        return None;
    }
    let index = current.items.iter().position(predicate)?;
    let mut items = current.items.clone();
    items.remove(index);
    Some(Inner {
        items,
        terminated: false,
    })
}

/// A lock-free copy-on-write array.
///
/// # Examples
///
/// ```rust
/// use fluxweld::cow::CowArray;
///
/// let array = CowArray::new();
/// assert!(array.add(1));
/// assert!(array.add(2));
/// let before = array.snapshot();
///
/// assert!(array.remove(&1));
/// assert_eq!(&*before, &[1, 2]);
/// assert_eq!(&*array.snapshot(), &[2]);
///
/// let last = array.terminate();
/// assert_eq!(&*last, &[2]);
/// assert!(!array.add(3));
/// ```
pub struct CowArray<T> {
    state: ArcSwap<Inner<T>>,
}

impl<T: Clone> CowArray<T> {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::new(Inner::empty()),
        }
    }

    /// Appends `item`. Returns `false` if the array was terminated.
    pub fn add(&self, item: T) -> bool {
        let mut added = false;
        self.state.rcu(|current| match with_added(current, &item) {
            Some(next) => {
                added = true;
                Arc::new(next)
            }
            None => {
                added = false;
                Arc::clone(current)
            }
        });
        added
    }

    /// Removes the first item matching `predicate`. Returns whether one was found.
    pub fn remove_where<P>(&self, predicate: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        let mut removed = false;
        self.state.rcu(|current| match without(current, &predicate) {
            Some(next) => {
                removed = true;
                Arc::new(next)
            }
            None => {
                removed = false;
                Arc::clone(current)
            }
        });
        removed
    }

    /// Removes the first item equal to `item`.
    pub fn remove(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.remove_where(|candidate| candidate == item)
    }

    /// The current contents.
    pub fn snapshot(&self) -> Snapshot<T> {
        Snapshot(self.state.load_full())
    }

    /// Empties the array for good and returns its final contents.
    ///
    /// Only the first call sees the members; later calls get an empty
    /// snapshot.
    pub fn terminate(&self) -> Snapshot<T> {
        let previous = self.state.swap(Arc::new(Inner {
            items: Vec::new(),
            terminated: true,
        }));
        if previous.terminated {
            return Snapshot(Arc::new(Inner {
                items: Vec::new(),
                terminated: true,
            }));
        }
        Snapshot(previous)
    }

    pub fn is_terminated(&self) -> bool {
        self.state.load().terminated
    }

    pub fn len(&self) -> usize {
        self.state.load().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for CowArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CowArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.load();
        f.debug_struct("CowArray")
            .field("len", &state.items.len())
            .field("terminated", &state.terminated)
            .finish()
    }
}

/// A copy-on-write array whose writers serialize on a lock.
///
/// Readers take the same lock as writers, but only long enough to clone the
/// current snapshot pointer; iteration then runs on the snapshot, outside the
/// lock, and never sees a later write.
pub struct LockedCowArray<T> {
    state: Mutex<Arc<Inner<T>>>,
}

impl<T: Clone> LockedCowArray<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Inner::empty()),
        }
    }

    pub fn add(&self, item: T) -> bool {
        let mut state = self.state.lock();
        match with_added(&state, &item) {
            Some(next) => {
                *state = Arc::new(next);
                true
            }
            None => false,
        }
    }

    pub fn remove_where<P>(&self, predicate: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        let mut state = self.state.lock();
        match without(&state, &predicate) {
            Some(next) => {
                *state = Arc::new(next);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.remove_where(|candidate| candidate == item)
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        Snapshot(Arc::clone(&self.state.lock()))
    }

    pub fn terminate(&self) -> Snapshot<T> {
        let mut state = self.state.lock();
        if state.terminated {
            return Snapshot(Arc::clone(&state));
        }
        let previous = std::mem::replace(
            &mut *state,
            Arc::new(Inner {
                items: Vec::new(),
                terminated: true,
            }),
        );
        Snapshot(previous)
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for LockedCowArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LockedCowArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LockedCowArray")
            .field("len", &state.items.len())
            .field("terminated", &state.terminated)
            .finish()
    }
}
