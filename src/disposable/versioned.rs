use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{Disposable, Handle};

enum VersionState {
    Empty,
    Live { version: u64, handle: Handle },
    Terminated,
}

/// A single-handle slot where only a strictly newer version may replace the
/// current handle.
///
/// Used where a late resubscription must not undo a newer one: each attempt
/// carries a monotonically increasing version, and an older attempt that
/// arrives after a newer one is rejected. Rejected and replaced handles are
/// both disposed, so no handle outlives its relevance.
pub struct VersionedSlot {
    state: ArcSwap<VersionState>,
}

impl VersionedSlot {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(VersionState::Empty),
        }
    }

    /// Installs `handle` under `version`.
    ///
    /// Returns `false` and disposes `handle` if the slot is terminated or
    /// already holds a version greater than or equal to `version`. On success
    /// the superseded handle is disposed.
    pub fn set(&self, version: u64, handle: Handle) -> bool {
        let next = Arc::new(VersionState::Live {
            version,
            handle: Arc::clone(&handle),
        });
        let mut current = self.state.load();
        loop {
            match &**current {
                VersionState::Terminated => {
                    handle.dispose();
                    return false;
                }
                VersionState::Live { version: held, .. } if *held >= version => {
                    handle.dispose();
                    return false;
                }
                _ => {}
            }

            let previous = self.state.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*previous, &*current) {
                if let VersionState::Live { handle: old, .. } = &**previous {
                    old.dispose();
                }
                return true;
            }
            current = self.state.load();
        }
    }

    /// The version currently held, if any.
    pub fn version(&self) -> Option<u64> {
        match &**self.state.load() {
            VersionState::Live { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// The handle currently held, if any.
    pub fn get(&self) -> Option<Handle> {
        match &**self.state.load() {
            VersionState::Live { handle, .. } => Some(Arc::clone(handle)),
            _ => None,
        }
    }
}

impl Default for VersionedSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for VersionedSlot {
    /// Terminates the slot, disposing the held handle.
    fn dispose(&self) {
        let previous = self.state.swap(Arc::new(VersionState::Terminated));
        if let VersionState::Live { handle, .. } = &*previous {
            handle.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        matches!(**self.state.load(), VersionState::Terminated)
    }
}

impl std::fmt::Debug for VersionedSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedSlot")
            .field("version", &self.version())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::Disposables;

    #[test]
    fn test_newer_version_replaces_and_disposes_older() {
        let slot = VersionedSlot::new();
        let first = Disposables::empty();
        let second = Disposables::empty();

        assert!(slot.set(1, first.clone()));
        assert!(slot.set(2, second.clone()));

        assert!(first.is_disposed());
        assert!(!second.is_disposed());
        assert_eq!(slot.version(), Some(2));
    }

    #[test]
    fn test_stale_version_is_disposed() {
        let slot = VersionedSlot::new();
        let current = Disposables::empty();
        let stale = Disposables::empty();
        let same = Disposables::empty();

        assert!(slot.set(5, current.clone()));
        assert!(!slot.set(3, stale.clone()));
        assert!(!slot.set(5, same.clone()));

        assert!(stale.is_disposed());
        assert!(same.is_disposed());
        assert!(!current.is_disposed());
        assert_eq!(slot.version(), Some(5));
    }

    #[test]
    fn test_dispose_is_terminal() {
        let slot = VersionedSlot::new();
        let held = Disposables::empty();
        slot.set(1, held.clone());

        slot.dispose();
        assert!(held.is_disposed());
        assert!(slot.is_disposed());

        let late = Disposables::empty();
        assert!(!slot.set(u64::MAX, late.clone()));
        assert!(late.is_disposed());
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_concurrent_versions_keep_the_highest() {
        let slot = Arc::new(VersionedSlot::new());
        let handles: Vec<Handle> = (0..8).map(|_| Disposables::empty()).collect();

        let workers: Vec<_> = handles
            .iter()
            .cloned()
            .enumerate()
            .map(|(version, handle)| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || {
                    slot.set(version as u64, handle);
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(slot.version(), Some(7));
        let live: Vec<_> = handles.iter().filter(|h| !h.is_disposed()).collect();
        assert_eq!(live.len(), 1);
        assert!(crate::disposable::same_handle(live[0], &handles[7]));
    }
}
