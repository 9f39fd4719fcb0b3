use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::config::QueueOptions;
use super::functions::QueueMessageHandler;
use crate::errors::{ConfigurationError, ListenerError};

/// A handler bound to one queue together with its receive options.
#[derive(Clone)]
pub struct HandlerBinding {
    pub handler: Arc<dyn QueueMessageHandler>,
    pub options: QueueOptions,
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Maps logical queue names to their handler.
///
/// Each queue name can be bound at most once. The registry is handed to a
/// [`ListenerContainer`](crate::container::ListenerContainer), which freezes
/// it when it initializes.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    bindings: BTreeMap<String, HandlerBinding>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Binds `handler` to `queue_name`.
    ///
    /// Fails without modifying the registry when the name is empty, the
    /// options are out of range or the queue is already bound.
    pub fn register<H>(
        &mut self,
        queue_name: &str,
        handler: H,
        options: QueueOptions,
    ) -> Result<(), ListenerError>
    where
        H: QueueMessageHandler + 'static,
    {
        self.register_arc(queue_name, Arc::new(handler), options)
    }

    /// Same as [`register`](Self::register) for an already shared handler.
    pub fn register_arc(
        &mut self,
        queue_name: &str,
        handler: Arc<dyn QueueMessageHandler>,
        options: QueueOptions,
    ) -> Result<(), ListenerError> {
        if queue_name.is_empty() {
            return Err(ConfigurationError::EmptyQueueName.into());
        }
        options.validate(queue_name)?;
        if self.bindings.contains_key(queue_name) {
            return Err(ConfigurationError::DuplicateQueueBinding(queue_name.to_string()).into());
        }

        debug!(queue = %queue_name, ?options, "Registered queue handler");
        self.bindings
            .insert(queue_name.to_string(), HandlerBinding { handler, options });
        Ok(())
    }

    pub fn get(&self, queue_name: &str) -> Option<&HandlerBinding> {
        self.bindings.get(queue_name)
    }

    pub fn options(&self, queue_name: &str) -> Option<&QueueOptions> {
        self.bindings.get(queue_name).map(|binding| &binding.options)
    }

    pub fn contains(&self, queue_name: &str) -> bool {
        self.bindings.contains_key(queue_name)
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HandlerBinding)> {
        self.bindings
            .iter()
            .map(|(name, binding)| (name.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
