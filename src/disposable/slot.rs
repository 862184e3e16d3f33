use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{Disposable, Handle};
use crate::error::ProtocolViolation;
use crate::hooks::Hooks;

#[derive(Clone)]
enum SlotState {
    Empty,
    Holding(Handle),
    Terminated,
}

/// Holds at most one cancellable handle.
///
/// The slot moves between `Empty` and `Holding(handle)` until it is
/// terminated; `Terminated` is absorbing and any handle offered afterwards is
/// disposed on arrival. Every transition is a single compare-and-swap on an
/// immutable state node, so the handle that loses a race is always the one
/// that gets disposed.
///
/// # Examples
///
/// ```rust
/// use fluxweld::disposable::{Disposables, ResourceSlot};
///
/// let slot = ResourceSlot::new();
/// let first = Disposables::empty();
/// let second = Disposables::empty();
///
/// assert!(slot.set(first.clone()));
/// assert!(slot.set(second.clone()));
/// assert!(first.is_disposed());
///
/// assert!(slot.terminate());
/// assert!(second.is_disposed());
/// assert!(!slot.terminate());
/// ```
pub struct ResourceSlot {
    state: ArcSwap<SlotState>,
    hooks: Hooks,
}

impl ResourceSlot {
    /// An empty slot reporting to the global hooks.
    pub fn new() -> Self {
        Self::with_hooks(Hooks::global())
    }

    /// An empty slot reporting to `hooks`.
    pub fn with_hooks(hooks: Hooks) -> Self {
        Self {
            state: ArcSwap::from_pointee(SlotState::Empty),
            hooks,
        }
    }

    /// A slot already holding `handle`.
    pub fn holding(handle: Handle, hooks: Hooks) -> Self {
        Self {
            state: ArcSwap::from_pointee(SlotState::Holding(handle)),
            hooks,
        }
    }

    /// Installs `handle`, disposing whatever was held before.
    ///
    /// If the slot is terminated, `handle` is disposed and `false` returned.
    pub fn set(&self, handle: Handle) -> bool {
        match self.swap_in(handle) {
            Some(Some(previous)) => {
                previous.dispose();
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Installs `handle` without disposing the previous one.
    ///
    /// Used when the caller re-parents the outgoing handle itself.
    pub fn replace(&self, handle: Handle) -> bool {
        self.swap_in(handle).is_some()
    }

    /// Installs `handle` only if the slot is empty.
    ///
    /// A terminated slot disposes `handle` and still reports success: the
    /// stage was cancelled before its upstream arrived. A slot that already
    /// holds a handle disposes `handle`, reports
    /// [`ProtocolViolation::DisposableAlreadySet`] and returns `false`.
    pub fn set_once(&self, handle: Handle) -> bool {
        let current = self.state.load();
        match **current {
            SlotState::Empty => {
                let previous = self
                    .state
                    .compare_and_swap(&current, Arc::new(SlotState::Holding(Arc::clone(&handle))));
                if Arc::ptr_eq(&*previous, &*current) {
                    return true;
                }
                // Lost the race; the winner decides what happens to us.
                handle.dispose();
                if matches!(**previous, SlotState::Terminated) {
                    return true;
                }
                self.hooks
                    .report_violation(ProtocolViolation::DisposableAlreadySet);
                false
            }
            SlotState::Terminated => {
                handle.dispose();
                true
            }
            SlotState::Holding(_) => {
                handle.dispose();
                self.hooks
                    .report_violation(ProtocolViolation::DisposableAlreadySet);
                false
            }
        }
    }

    /// Moves the slot to its terminal state, disposing the held handle.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn terminate(&self) -> bool {
        let previous = self.state.swap(Arc::new(SlotState::Terminated));
        match &*previous {
            SlotState::Terminated => false,
            SlotState::Holding(handle) => {
                handle.dispose();
                true
            }
            SlotState::Empty => true,
        }
    }

    /// The currently held handle, if any.
    pub fn get(&self) -> Option<Handle> {
        match &**self.state.load() {
            SlotState::Holding(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Whether the slot holds nothing and is not terminated.
    pub fn is_empty(&self) -> bool {
        matches!(**self.state.load(), SlotState::Empty)
    }

    /// Whether [`terminate`](Self::terminate) has run.
    pub fn is_terminated(&self) -> bool {
        matches!(**self.state.load(), SlotState::Terminated)
    }

    /// Swaps `handle` in unless terminated.
    ///
    /// `None` means the slot was terminated and `handle` has been disposed;
    /// `Some(previous)` carries whatever was held before the swap.
    fn swap_in(&self, handle: Handle) -> Option<Option<Handle>> {
        let next = Arc::new(SlotState::Holding(handle));
        let mut current = self.state.load();
        loop {
            if matches!(**current, SlotState::Terminated) {
                if let SlotState::Holding(handle) = &*next {
                    handle.dispose();
                }
                return None;
            }
            let previous = self.state.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*previous, &*current) {
                return match &**previous {
                    SlotState::Holding(old) => Some(Some(Arc::clone(old))),
                    _ => Some(None),
                };
            }
            current = self.state.load();
        }
    }
}

impl Default for ResourceSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for ResourceSlot {
    fn dispose(&self) {
        self.terminate();
    }

    fn is_disposed(&self) -> bool {
        self.is_terminated()
    }
}

impl std::fmt::Debug for ResourceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match **self.state.load() {
            SlotState::Empty => "Empty",
            SlotState::Holding(_) => "Holding",
            SlotState::Terminated => "Terminated",
        };
        f.debug_struct("ResourceSlot").field("state", &state).finish()
    }
}
