//! The error hook: where failures go when no live subscriber can take them.
//!
//! A double terminal signal, a failure arriving after termination or a
//! protocol violation cannot be thrown back at the caller (the caller is
//! rarely the culprit). Every component that can produce such a failure is
//! given a [`Hooks`] handle at construction. Plain constructors use the
//! process-wide default, which can be replaced once at startup.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::{Error, ProtocolViolation};
use crate::metrics;

type Handler = dyn Fn(Error) + Send + Sync;

static GLOBAL: OnceLock<Hooks> = OnceLock::new();

/// A cloneable handle to an undeliverable-error handler.
#[derive(Clone)]
pub struct Hooks {
    handler: Arc<Handler>,
}

impl Hooks {
    /// Creates hooks that forward undeliverable failures to `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// The default policy: log the failure and count it.
    pub fn logging() -> Self {
        Self::new(|e| {
            error!(target: "fluxweld::hooks", error = %e, "undeliverable error");
        })
    }

    /// A policy that panics on any undeliverable failure.
    ///
    /// Useful in tests that must never observe a violation.
    pub fn panicking() -> Self {
        Self::new(|e| panic!("undeliverable error: {}", e))
    }

    /// A policy that records every failure into a shared buffer.
    pub fn recording() -> (Self, Arc<Mutex<Vec<Error>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&sink);
        let hooks = Self::new(move |e| recorder.lock().push(e));
        (hooks, sink)
    }

    /// Returns the process-wide hooks, initialising them to [`Hooks::logging`]
    /// if nothing was installed.
    pub fn global() -> Hooks {
        GLOBAL.get_or_init(Hooks::logging).clone()
    }

    /// Installs the process-wide hooks.
    ///
    /// Only the first call (and only if nothing read the global before) wins;
    /// later calls hand the rejected hooks back.
    pub fn install_global(hooks: Hooks) -> std::result::Result<(), Hooks> {
        GLOBAL.set(hooks)
    }

    /// Routes a failure that has no live subscriber.
    pub fn on_error(&self, error: Error) {
        metrics::record_undeliverable();
        (self.handler)(error);
    }

    /// Reports a broken stage contract.
    pub fn report_violation(&self, violation: ProtocolViolation) {
        warn!(kind = violation.kind(), "protocol violation: {}", violation);
        metrics::record_violation(violation.kind());
        self.on_error(Error::Protocol(violation));
    }

    /// Validates a request amount, reporting zero as a violation.
    ///
    /// Returns `true` when `n` is a valid demand.
    pub fn validate_request(&self, n: u64) -> bool {
        if n == 0 {
            self.report_violation(ProtocolViolation::NonPositiveRequest(n));
            return false;
        }
        true
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
