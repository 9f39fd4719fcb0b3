use std::time::Duration;

use crate::client::ReceiveRequest;
use crate::errors::ConfigurationError;

/// Upper bound the queue service accepts for messages per receive call.
pub const MAX_NUMBER_OF_MESSAGES: i32 = 10;
/// Upper bound for long polling, which also bounds how long a stop signal
/// waits for an in-progress receive call.
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;
/// Upper bound for the visibility timeout (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 43_200;

const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Per-queue receive configuration.
///
/// # Fields
/// - `max_number_of_messages`: messages requested per receive call, 1 to 10.
/// - `wait_time_seconds`: long polling wait, 0 to 20. `None` uses the wait
///   time configured on the queue itself.
/// - `visibility_timeout_seconds`: how long received messages stay hidden.
///   `None` uses the queue's visibility timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// The maximum number of messages to receive in a single request.
    pub max_number_of_messages: i32,

    /// The wait time for long polling, in seconds.
    pub wait_time_seconds: Option<i32>,

    /// The visibility timeout applied to received messages, in seconds.
    pub visibility_timeout_seconds: Option<i32>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            max_number_of_messages: MAX_NUMBER_OF_MESSAGES,
            wait_time_seconds: Some(MAX_WAIT_TIME_SECONDS),
            visibility_timeout_seconds: None,
        }
    }
}

impl QueueOptions {
    pub fn with_max_number_of_messages(mut self, max_number_of_messages: i32) -> Self {
        self.max_number_of_messages = max_number_of_messages;
        self
    }

    pub fn with_wait_time_seconds(mut self, wait_time_seconds: Option<i32>) -> Self {
        self.wait_time_seconds = wait_time_seconds;
        self
    }

    pub fn with_visibility_timeout_seconds(mut self, visibility_timeout: Option<i32>) -> Self {
        self.visibility_timeout_seconds = visibility_timeout;
        self
    }

    /// Checks every field against the limits of the queue service.
    pub fn validate(&self, queue: &str) -> Result<(), ConfigurationError> {
        if !(1..=MAX_NUMBER_OF_MESSAGES).contains(&self.max_number_of_messages) {
            return Err(ConfigurationError::MaxMessagesOutOfRange {
                queue: queue.to_string(),
                value: self.max_number_of_messages,
            });
        }

        if let Some(wait) = self.wait_time_seconds {
            if !(0..=MAX_WAIT_TIME_SECONDS).contains(&wait) {
                return Err(ConfigurationError::WaitTimeOutOfRange {
                    queue: queue.to_string(),
                    value: wait,
                });
            }
        }

        if let Some(visibility) = self.visibility_timeout_seconds {
            if !(0..=MAX_VISIBILITY_TIMEOUT_SECONDS).contains(&visibility) {
                return Err(ConfigurationError::VisibilityTimeoutOutOfRange {
                    queue: queue.to_string(),
                    value: visibility,
                });
            }
        }

        Ok(())
    }

    pub fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            max_number_of_messages: self.max_number_of_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
        }
    }
}

/// How received messages are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// The polling worker runs each handler to completion before touching
    /// the next message or issuing the next receive. Messages of one queue
    /// are processed in order, one at a time.
    Synchronous,

    /// Every message runs as its own task. `max_in_flight` caps the number
    /// of handler executions across all queues of the container. Before each
    /// receive a polling worker waits until a full batch of slots is free, so
    /// fetched messages start right away. With `max_in_flight` below a
    /// queue's batch size the surplus messages of a batch wait for free
    /// slots.
    Concurrent { max_in_flight: usize },
}

impl Default for DispatchStrategy {
    fn default() -> Self {
        DispatchStrategy::Concurrent {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Container-wide settings.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub dispatch: DispatchStrategy,

    /// How long `stop` waits for the handlers of one queue before abandoning
    /// them, for both dispatch strategies. Abandoned messages are not
    /// deleted. `None` waits until they finish.
    pub drain_timeout: Option<Duration>,

    /// Pause after the first failed receive call; doubled for every further
    /// consecutive failure.
    pub receive_error_backoff: Duration,

    /// Cap for the receive error backoff.
    pub max_receive_error_backoff: Duration,

    /// Create queues that do not exist instead of failing their resolution.
    pub auto_create_queues: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            dispatch: DispatchStrategy::default(),
            drain_timeout: Some(Duration::from_secs(30)),
            receive_error_backoff: Duration::from_secs(1),
            max_receive_error_backoff: Duration::from_secs(30),
            auto_create_queues: false,
        }
    }
}

impl ContainerConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self.dispatch {
            DispatchStrategy::Concurrent { max_in_flight: 0 } => {
                Err(ConfigurationError::InvalidConcurrency(0))
            }
            _ => Ok(()),
        }
    }

    /// Backoff before the next receive after `consecutive_errors` failures.
    pub(crate) fn receive_backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(16);
        self.receive_error_backoff
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_receive_error_backoff)
    }
}
