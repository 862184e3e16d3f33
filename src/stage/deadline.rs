use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::disposable::ResourceSlot;
use crate::error::Error;
use crate::hooks::Hooks;
use crate::scheduler::SchedulerRef;
use crate::traits::{Disposable, Handle, SingleObserver, SingleSource};

/// Fails a single-value stream that does not finish within a duration.
///
/// The upstream outcome and the scheduled timeout race to terminate one
/// [`ResourceSlot`]. Whichever terminates it first signals downstream; the
/// other side finds the slot terminated and backs off. The loser's handle
/// (the upstream attachment or the pending timer) is disposed by the
/// winner's `terminate`.
pub struct Deadline<T> {
    downstream: Arc<dyn SingleObserver<T>>,
    /// Upstream attachment; terminating it decides the race.
    upstream: ResourceSlot,
    timer: ResourceSlot,
    duration: Duration,
    hooks: Hooks,
}

impl<T: Send + 'static> Deadline<T> {
    /// Subscribes `downstream` to `source`, failing it with
    /// [`Error::Timeout`] if no outcome arrives within `duration`.
    ///
    /// Returns the stage, which also serves as the downstream's cancel handle.
    pub fn subscribe<S>(
        source: &S,
        downstream: Arc<dyn SingleObserver<T>>,
        duration: Duration,
        scheduler: SchedulerRef,
        hooks: Hooks,
    ) -> Arc<Self>
    where
        S: SingleSource<T> + ?Sized,
    {
        let deadline = Arc::new(Self {
            downstream,
            upstream: ResourceSlot::with_hooks(hooks.clone()),
            timer: ResourceSlot::with_hooks(hooks.clone()),
            duration,
            hooks,
        });
        deadline.downstream.on_subscribe(deadline.clone());

        let on_timeout = Arc::clone(&deadline);
        let timer = scheduler.schedule_after(duration, Box::new(move || on_timeout.expire()));
        deadline.timer.set(timer);

        source.subscribe(deadline.clone());
        deadline
    }

    fn expire(&self) {
        if self.upstream.terminate() {
            debug!(duration = ?self.duration, "deadline expired");
            self.timer.terminate();
            let millis = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX);
            self.downstream.on_error(Error::timeout(millis));
        }
    }

    /// Whether an outcome (or the timeout) has already been delivered.
    pub fn is_settled(&self) -> bool {
        self.upstream.is_terminated()
    }
}

impl<T: Send + 'static> SingleObserver<T> for Deadline<T> {
    fn on_subscribe(&self, handle: Handle) {
        self.upstream.set_once(handle);
    }

    fn on_success(&self, value: T) {
        if self.upstream.terminate() {
            self.timer.terminate();
            self.downstream.on_success(value);
        }
    }

    fn on_error(&self, error: Error) {
        if self.upstream.terminate() {
            self.timer.terminate();
            self.downstream.on_error(error);
        } else {
            self.hooks.on_error(error);
        }
    }
}

impl<T: Send + 'static> Disposable for Deadline<T> {
    fn dispose(&self) {
        self.upstream.terminate();
        self.timer.terminate();
    }

    fn is_disposed(&self) -> bool {
        self.upstream.is_terminated()
    }
}

impl<T> std::fmt::Debug for Deadline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("duration", &self.duration)
            .field("settled", &self.upstream.is_terminated())
            .finish_non_exhaustive()
    }
}
