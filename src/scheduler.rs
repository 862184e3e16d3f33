//! The scheduling capability stages hop onto.
//!
//! A [`Scheduler`] runs an action, now or after a delay, and hands back a
//! [`Handle`] that cancels it if it has not started. Stages that accept an
//! optional scheduler run their drain loop on the signalling thread when
//! none is given.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle as RuntimeHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};
use crate::traits::{Disposable, Handle};

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs actions, optionally after a delay, with cancellation.
pub trait Scheduler: Send + Sync {
    /// Runs `task` as soon as possible.
    fn schedule(&self, task: Task) -> Handle;

    /// Runs `task` once `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, task: Task) -> Handle;
}

/// Shared handle to a scheduler.
pub type SchedulerRef = Arc<dyn Scheduler>;

/// Cancels a scheduled task through its token.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    token: CancellationToken,
}

impl Disposable for TaskHandle {
    fn dispose(&self) {
        self.token.cancel();
    }

    fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A scheduler backed by a tokio runtime.
///
/// Tasks are spawned onto the runtime; a disposed handle stops a task that
/// has not started yet and aborts a pending delay.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: RuntimeHandle,
}

impl TokioScheduler {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self { runtime }
    }

    /// A scheduler on the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        RuntimeHandle::try_current()
            .map(Self::new)
            .map_err(|e| Error::custom(format!("no tokio runtime: {}", e)))
    }

    /// Wraps this scheduler into a shared handle.
    pub fn shared(self) -> SchedulerRef {
        Arc::new(self)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) -> Handle {
        let token = CancellationToken::new();
        let guard = token.clone();
        self.runtime.spawn(async move {
            if guard.is_cancelled() {
                trace!("scheduled task cancelled before start");
                return;
            }
            task();
        });
        Arc::new(TaskHandle { token })
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> Handle {
        let token = CancellationToken::new();
        let guard = token.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => {
                    trace!(?delay, "delayed task cancelled");
                }
                _ = tokio::time::sleep(delay) => task(),
            }
        });
        Arc::new(TaskHandle { token })
    }
}
