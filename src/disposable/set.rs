use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{same_handle, Disposable, Handle};

/// A mutable, bulk-disposable collection of handles.
///
/// Structural changes take a per-instance lock; adding and removing handles
/// is a per-attachment operation, not a per-item one. Once disposed, the set
/// stays disposed and disposes anything added later.
#[derive(Default)]
pub struct ResourceSet {
    disposed: AtomicBool,
    resources: Mutex<Vec<Handle>>,
}

impl ResourceSet {
    /// An empty, active set.
    pub fn new() -> Self {
        Self::default()
    }

    /// An active set seeded with `handles`.
    pub fn from_handles<I>(handles: I) -> Self
    where
        I: IntoIterator<Item = Handle>,
    {
        Self {
            disposed: AtomicBool::new(false),
            resources: Mutex::new(handles.into_iter().collect()),
        }
    }

    /// Adds `handle`, or disposes it immediately if the set is disposed.
    pub fn add(&self, handle: Handle) -> bool {
        if !self.disposed.load(Ordering::Acquire) {
            let mut resources = self.resources.lock();
            if !self.disposed.load(Ordering::Acquire) {
                resources.push(handle);
                return true;
            }
        }
        handle.dispose();
        false
    }

    /// Adds every handle, or disposes all of them if the set is disposed.
    pub fn add_all<I>(&self, handles: I) -> bool
    where
        I: IntoIterator<Item = Handle>,
    {
        let handles: Vec<Handle> = handles.into_iter().collect();
        if !self.disposed.load(Ordering::Acquire) {
            let mut resources = self.resources.lock();
            if !self.disposed.load(Ordering::Acquire) {
                resources.extend(handles);
                return true;
            }
        }
        for handle in handles {
            handle.dispose();
        }
        false
    }

    /// Removes and disposes `handle` if it is in the set.
    ///
    /// Returns `false` without disposing when the handle was not present.
    pub fn remove(&self, handle: &Handle) -> bool {
        if self.delete(handle) {
            handle.dispose();
            return true;
        }
        false
    }

    /// Removes `handle` without disposing it.
    pub fn delete(&self, handle: &Handle) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        let mut resources = self.resources.lock();
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        match resources.iter().position(|h| same_handle(h, handle)) {
            Some(index) => {
                resources.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Disposes every held handle and leaves the set empty but active.
    pub fn clear(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let drained = std::mem::take(&mut *self.resources.lock());
        dispose_all(drained);
    }

    /// Number of handles currently held.
    pub fn len(&self) -> usize {
        if self.disposed.load(Ordering::Acquire) {
            return 0;
        }
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dispose_all(handles: Vec<Handle>) {
    for handle in handles {
        handle.dispose();
    }
}

impl Disposable for ResourceSet {
    /// Disposes every held handle and permanently marks the set disposed.
    fn dispose(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let drained = {
            let mut resources = self.resources.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *resources)
        };
        dispose_all(drained);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ResourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSet")
            .field("disposed", &self.is_disposed())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::disposable::tests::counting;
    use crate::disposable::Disposables;

    #[test]
    fn test_add_after_dispose_disposes_incoming() {
        let set = ResourceSet::new();
        set.dispose();

        let (handle, count) = counting();
        assert!(!set.add(handle));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(set.is_disposed());
    }

    #[test]
    fn test_remove_only_disposes_present_handles() {
        let set = ResourceSet::new();
        let (held, held_count) = counting();
        let (stranger, stranger_count) = counting();

        set.add(held.clone());
        assert!(!set.remove(&stranger));
        assert_eq!(stranger_count.load(Ordering::SeqCst), 0);

        assert!(set.remove(&held));
        assert!(!set.remove(&held));
        assert_eq!(held_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete_does_not_dispose() {
        let set = ResourceSet::new();
        let handle = Disposables::empty();
        set.add(handle.clone());

        assert!(set.delete(&handle));
        assert!(!handle.is_disposed());
        assert!(set.is_empty());
    }

    #[test]
    fn test_clear_is_reusable() {
        let set = ResourceSet::from_handles(vec![Disposables::empty(), Disposables::empty()]);
        assert_eq!(set.len(), 2);

        set.clear();
        assert!(set.is_empty());
        assert!(!set.is_disposed());

        let handle = Disposables::empty();
        assert!(set.add(handle.clone()));
        assert!(!handle.is_disposed());
    }

    #[test]
    fn test_dispose_releases_everything_once() {
        let (a, a_count) = counting();
        let (b, b_count) = counting();
        let set = ResourceSet::new();
        assert!(set.add_all(vec![a, b]));

        set.dispose();
        set.dispose();

        assert_eq!(a_count.load(Ordering::SeqCst), 1);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }
}
