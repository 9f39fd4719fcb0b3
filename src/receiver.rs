//! Handler registration, message dispatch and the per-queue polling worker.

use std::sync::Arc;

pub mod config;
mod dispatch;
mod functions;
mod registry;
mod worker;

pub use config::{ContainerConfig, DispatchStrategy, QueueOptions};
pub use dispatch::{Acknowledgement, MessageOutcome};
pub use functions::{
    BodyHandlerFn, MessageHandlerFn, QueueMessageHandler, handler_fn, message_handler_fn,
};
pub use registry::{HandlerBinding, HandlerRegistry};

pub(crate) use dispatch::Dispatcher;
pub(crate) use worker::PollingWorker;

/// A queue the container polls, frozen when the container initializes.
pub struct QueueRegistration {
    /// The logical name the handler was registered under.
    logical_name: String,

    /// The resolved queue url.
    queue_url: String,

    /// Whether failed messages are left for the queue's dead-letter policy.
    has_redrive_policy: bool,

    options: QueueOptions,

    handler: Arc<dyn QueueMessageHandler>,
}

impl QueueRegistration {
    pub(crate) fn new(
        logical_name: &str,
        queue_url: String,
        has_redrive_policy: bool,
        binding: &HandlerBinding,
    ) -> Self {
        QueueRegistration {
            logical_name: logical_name.to_string(),
            queue_url,
            has_redrive_policy,
            options: binding.options,
            handler: binding.handler.clone(),
        }
    }

    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn has_redrive_policy(&self) -> bool {
        self.has_redrive_policy
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub(crate) fn handler(&self) -> &Arc<dyn QueueMessageHandler> {
        &self.handler
    }
}

impl std::fmt::Debug for QueueRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistration")
            .field("logical_name", &self.logical_name)
            .field("queue_url", &self.queue_url)
            .field("has_redrive_policy", &self.has_redrive_policy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
