use std::sync::Arc;

use tracing::debug;

use crate::client::{QueueClient, REDRIVE_POLICY_ATTRIBUTE};
use crate::errors::{ConfigurationError, ListenerError};

/// Queries queue attributes that change how the container treats failures.
///
/// Called once per queue while the container initializes. A failed fetch is
/// a configuration error: guessing the redrive policy would either drop
/// failed messages or redeliver them forever.
pub struct QueueAttributeFetcher {
    client: Arc<dyn QueueClient>,
}

impl QueueAttributeFetcher {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        QueueAttributeFetcher { client }
    }

    /// Returns whether a dead-letter (redrive) policy is attached to the queue.
    pub async fn fetch_redrive_policy_presence(
        &self,
        queue_url: &str,
    ) -> Result<bool, ListenerError> {
        let attributes = self
            .client
            .queue_attributes(queue_url, &[REDRIVE_POLICY_ATTRIBUTE])
            .await
            .map_err(|err| ConfigurationError::AttributeFetch {
                queue: queue_url.to_string(),
                reason: err.to_string(),
            })?;

        let has_redrive_policy = attributes.contains_key(REDRIVE_POLICY_ATTRIBUTE);
        debug!(queue_url = %queue_url, has_redrive_policy, "Fetched queue attributes");
        Ok(has_redrive_policy)
    }
}
