//! Error types for the stream substrate.
//!
//! Failures come in three shapes: protocol violations (a stage broke the
//! subscribe/request/terminate contract), callback failures (user code
//! returned an error) and composites (several failures that must travel
//! through one single-failure channel).

use std::sync::Arc;

use thiserror::Error;

/// A breach of the stream stage contract.
///
/// Violations are never returned to the caller that triggered them (the
/// violator is usually not the caller); they are reported through
/// [`Hooks`](crate::hooks::Hooks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A second upstream subscription arrived at a stage that already has one.
    #[error("Subscription already set")]
    SubscriptionAlreadySet,

    /// A second handle arrived at a set-once resource slot.
    #[error("Disposable already set")]
    DisposableAlreadySet,

    /// `request(n)` was called with a non-positive amount.
    #[error("Request amount must be positive, got {0}")]
    NonPositiveRequest(u64),

    /// More items were delivered than were requested.
    #[error("More produced than requested: {0}")]
    MoreProducedThanRequested(u64),

    /// A second terminal signal was emitted.
    #[error("Terminal signal emitted twice")]
    DoubleTerminal,

    /// `on_subscribe` arrived after the stage already terminated.
    #[error("on_subscribe called after a terminal signal")]
    OnSubscribeAfterTerminal,

    /// A bounded hand-off refused an item because downstream stopped draining.
    ///
    /// The queues in this crate are unbounded and never refuse an item, so
    /// nothing here reports it. It is reserved for caller-supplied bounded
    /// [`SimpleQueue`](crate::queue::SimpleQueue) implementations whose
    /// `offer` returns `false`.
    #[error("Queue is full")]
    QueueFull,
}

impl ProtocolViolation {
    /// A short, stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolViolation::SubscriptionAlreadySet => "subscription_already_set",
            ProtocolViolation::DisposableAlreadySet => "disposable_already_set",
            ProtocolViolation::NonPositiveRequest(_) => "non_positive_request",
            ProtocolViolation::MoreProducedThanRequested(_) => "more_produced_than_requested",
            ProtocolViolation::DoubleTerminal => "double_terminal",
            ProtocolViolation::OnSubscribeAfterTerminal => "on_subscribe_after_terminal",
            ProtocolViolation::QueueFull => "queue_full",
        }
    }
}

/// The main error type for the stream substrate.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The stage contract was broken
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// A user-supplied callback failed
    #[error("Callback error: {0}")]
    Callback(Arc<dyn std::error::Error + Send + Sync>),

    /// Several failures travelling as one, in arrival order
    #[error("Multiple errors occurred: {}", render_composite(.0))]
    Composite(Vec<Error>),

    /// The stage was cancelled before it could deliver
    #[error("Stage was cancelled")]
    Cancelled,

    /// An operation did not finish in time
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

fn render_composite(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}]", e))
        .collect::<Vec<_>>()
        .join(", ")
}

// Convenience constructors
impl Error {
    /// Create a callback error from any error type
    pub fn callback<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Callback(Arc::new(error))
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Combines two failures into one, preserving arrival order.
    ///
    /// Nested composites are flattened so that the result always lists leaf
    /// failures.
    pub fn compose(first: Error, second: Error) -> Error {
        let mut errors = first.flatten();
        errors.extend(second.flatten());
        Error::Composite(errors)
    }

    /// Returns the leaf failures carried by this error, in order.
    pub fn flatten(self) -> Vec<Error> {
        match self {
            Error::Composite(errors) => errors.into_iter().flat_map(Error::flatten).collect(),
            other => vec![other],
        }
    }

    /// Returns the protocol violation carried by this error, if it is one.
    pub fn as_violation(&self) -> Option<ProtocolViolation> {
        match self {
            Error::Protocol(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether this error aggregates more than one failure.
    pub fn is_composite(&self) -> bool {
        matches!(self, Error::Composite(_))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Callback(Arc::from(e))
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for routing user callback results into the error channel
pub trait IntoCallbackError<T> {
    fn into_callback_error(self) -> Result<T>;
}

impl<T, E> IntoCallbackError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_callback_error(self) -> Result<T> {
        self.map_err(Error::callback)
    }
}
