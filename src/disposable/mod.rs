//! Resource lifecycle primitives.
//!
//! - [`ResourceSlot`]: at most one handle, with an absorbing terminal state
//! - [`ResourceSet`]: a bulk-disposable, reusable handle collection
//! - [`VersionedSlot`]: single-handle replacement guarded by a version
//!
//! plus the small [`Disposables`] factory for action and flag disposables.

mod set;
mod slot;
mod versioned;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub use set::ResourceSet;
pub use slot::ResourceSlot;
pub use versioned::VersionedSlot;

pub use crate::traits::{Disposable, Handle};

/// Whether two handles point at the same resource.
pub(crate) fn same_handle(a: &Handle, b: &Handle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

type Action = Box<dyn FnOnce() + Send>;

/// Runs a release action the first time it is disposed.
pub struct ActionDisposable {
    disposed: AtomicBool,
    action: Mutex<Option<Action>>,
}

impl ActionDisposable {
    /// Wrap a release action.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            disposed: AtomicBool::new(false),
            action: Mutex::new(Some(Box::new(action))),
        }
    }
}

impl Disposable for ActionDisposable {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ActionDisposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDisposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A disposable that only records whether it was disposed.
#[derive(Debug, Default)]
pub struct BooleanDisposable {
    disposed: AtomicBool,
}

impl BooleanDisposable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Disposable for BooleanDisposable {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Factory functions for common handles.
pub struct Disposables;

impl Disposables {
    /// A handle that runs `action` once on first disposal.
    pub fn from_fn<F>(action: F) -> Handle
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(ActionDisposable::new(action))
    }

    /// A fresh, not yet disposed handle with no release action.
    pub fn empty() -> Handle {
        Arc::new(BooleanDisposable::new())
    }

    /// A handle that is already disposed.
    pub fn disposed() -> Handle {
        let handle = BooleanDisposable::new();
        handle.dispose();
        Arc::new(handle)
    }
}
