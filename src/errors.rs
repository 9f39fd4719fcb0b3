use std::str::FromStr;

use thiserror::Error;

/// Error types for listener container operations.
///
/// Configuration and lifecycle misuse are returned to the caller. Failures
/// local to one message or one queue are never returned from the lifecycle
/// methods; they are handed to the container's
/// [`ErrorObserver`](crate::observer::ErrorObserver) instead.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The container or one of its registrations is misconfigured.
    #[error("invalid listener configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The queue service reports that the named queue does not exist.
    #[error("destination `{0}` could not be resolved")]
    UnresolvableDestination(String),

    /// The destination lookup itself failed.
    #[error("failed to resolve destination `{name}`: {source}")]
    Resolution {
        name: String,
        #[source]
        source: ClientError,
    },

    /// A receive call failed. The polling worker retries on its next cycle.
    #[error("failed to receive messages from `{queue}`: {source}")]
    TransientReceive {
        queue: String,
        #[source]
        source: ClientError,
    },

    /// A handler returned an error or panicked.
    #[error("handler failed for message `{message_id}` on `{queue}`: {source}")]
    HandlerFailure {
        queue: String,
        message_id: String,
        #[source]
        source: HandlerError,
    },

    /// Deleting a settled message failed.
    #[error("failed to delete message `{message_id}` from `{queue}`: {source}")]
    Acknowledgement {
        queue: String,
        message_id: String,
        #[source]
        source: ClientError,
    },

    /// Handlers can only be bound before the container initializes.
    #[error("handlers can only be registered before the container is initialized")]
    RegistrationClosed,

    /// Returned by every lifecycle method once the container is destroyed.
    #[error("listener container has been destroyed")]
    ContainerClosed,
}

/// Configuration problems detected at registration or initialization time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("queue `{0}` is already bound to a handler")]
    DuplicateQueueBinding(String),

    #[error("queue name must not be empty")]
    EmptyQueueName,

    #[error("max number of messages for `{queue}` must be between 1 and 10, got {value}")]
    MaxMessagesOutOfRange { queue: String, value: i32 },

    #[error("wait time for `{queue}` must be between 0 and 20 seconds, got {value}")]
    WaitTimeOutOfRange { queue: String, value: i32 },

    #[error("visibility timeout for `{queue}` must be between 0 and 43200 seconds, got {value}")]
    VisibilityTimeoutOutOfRange { queue: String, value: i32 },

    #[error("concurrent dispatch needs at least one execution slot, got {0}")]
    InvalidConcurrency(usize),

    #[error("a queue client is required")]
    MissingClient,

    #[error("failed to fetch attributes of `{queue}`: {reason}")]
    AttributeFetch { queue: String, reason: String },
}

/// Errors reported by a [`QueueClient`](crate::client::QueueClient).
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("queue `{0}` does not exist")]
    QueueDoesNotExist(String),

    #[error("queue service error: {0}")]
    Service(String),
}

/// Failure signal returned by a message handler.
///
/// Any error type can be converted with [`HandlerError::from_error`];
/// plain strings convert directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct HandlerError(String);

impl HandlerError {
    /// Creates a new `HandlerError` with the provided message.
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }

    /// Wraps any displayable error, keeping only its message.
    pub fn from_error<E: std::error::Error>(error: E) -> Self {
        HandlerError(error.to_string())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HandlerError {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HandlerError::new(s))
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        HandlerError::new(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        HandlerError::new(s)
    }
}
