//! The queue service contract consumed by the container, and its AWS SQS
//! implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};
use tracing::{debug, warn};

use crate::errors::ClientError;

/// Name of the queue attribute that carries a dead-letter configuration.
pub const REDRIVE_POLICY_ATTRIBUTE: &str = "RedrivePolicy";

/// Requests every system and custom attribute on receive.
const ALL_ATTRIBUTES: &str = "All";

/// A message received from a queue and not yet acknowledged.
///
/// The receipt handle belongs to this delivery only; a redelivery of the
/// same message carries a new handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    /// System attributes such as `ApproximateReceiveCount`.
    pub attributes: HashMap<String, String>,
    /// String-valued custom message attributes.
    pub message_attributes: HashMap<String, String>,
}

impl QueueMessage {
    pub fn new(
        message_id: impl Into<String>,
        receipt_handle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        QueueMessage {
            message_id: message_id.into(),
            receipt_handle: receipt_handle.into(),
            body: body.into(),
            attributes: HashMap::new(),
            message_attributes: HashMap::new(),
        }
    }

    /// Number of times this message has been delivered, when the queue
    /// service reported it.
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get(MessageSystemAttributeName::ApproximateReceiveCount.as_str())
            .and_then(|count| count.parse().ok())
    }
}

/// Parameters of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_number_of_messages: i32,
    pub wait_time_seconds: Option<i32>,
    pub visibility_timeout_seconds: Option<i32>,
}

/// Operations the listener container needs from a queue service.
///
/// Implementations are shared by every polling worker and must be safe to
/// call concurrently.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Looks up the endpoint of a queue by name. `Ok(None)` means the queue
    /// does not exist.
    async fn queue_url(&self, queue_name: &str) -> Result<Option<String>, ClientError>;

    /// Creates the queue if needed and returns its endpoint.
    async fn create_queue(&self, queue_name: &str) -> Result<String, ClientError>;

    /// Receives up to `request.max_number_of_messages` messages, waiting at
    /// most `request.wait_time_seconds` for the first one to arrive.
    async fn receive_messages(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<QueueMessage>, ClientError>;

    /// Deletes one delivery. Deleting an expired or already deleted receipt
    /// handle succeeds.
    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), ClientError>;

    /// Fetches the requested queue attributes. Attributes that are not set
    /// on the queue are absent from the returned map.
    async fn queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> Result<HashMap<String, String>, ClientError>;

    /// Releases any resources held by the client.
    async fn shutdown(&self) {}
}

/// [`QueueClient`] backed by the AWS SQS SDK.
#[derive(Debug, Clone)]
pub struct SqsQueueClient {
    sqs_client: aws_sdk_sqs::Client,
}

impl SqsQueueClient {
    pub fn new(sqs_client: aws_sdk_sqs::Client) -> Self {
        SqsQueueClient { sqs_client }
    }

    /// Creates a client using configuration from the environment
    /// (`AWS_REGION`, `AWS_PROFILE`, the default credential chain and
    /// `AWS_ENDPOINT_URL` for local emulators).
    ///
    /// ```rust,no_run
    /// use sqs_listener_container::client::SqsQueueClient;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let client = SqsQueueClient::from_env().await;
    ///     // Hand the client to a ListenerContainer...
    /// }
    /// ```
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        SqsQueueClient::new(aws_sdk_sqs::Client::new(&config))
    }

    pub fn inner(&self) -> &aws_sdk_sqs::Client {
        &self.sqs_client
    }
}

impl From<aws_sdk_sqs::Client> for SqsQueueClient {
    fn from(sqs_client: aws_sdk_sqs::Client) -> Self {
        SqsQueueClient::new(sqs_client)
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn queue_url(&self, queue_name: &str) -> Result<Option<String>, ClientError> {
        match self
            .sqs_client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
        {
            Ok(output) => Ok(output.queue_url().map(str::to_string)),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_queue_does_not_exist()) =>
            {
                Ok(None)
            }
            Err(err) => Err(ClientError::Service(DisplayErrorContext(&err).to_string())),
        }
    }

    async fn create_queue(&self, queue_name: &str) -> Result<String, ClientError> {
        let output = self
            .sqs_client
            .create_queue()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|err| ClientError::Service(DisplayErrorContext(&err).to_string()))?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Service(format!("no url returned for `{queue_name}`")))
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<QueueMessage>, ClientError> {
        let output = self
            .sqs_client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(request.max_number_of_messages)
            .set_wait_time_seconds(request.wait_time_seconds)
            .set_visibility_timeout(request.visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names(ALL_ATTRIBUTES)
            .send()
            .await
            .map_err(|err| ClientError::Service(DisplayErrorContext(&err).to_string()))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|message| {
                let converted = convert_message(message);
                if converted.is_none() {
                    warn!(
                        queue_url = %queue_url,
                        message_id = message.message_id().unwrap_or("unknown"),
                        "Dropping delivery without a receipt handle"
                    );
                }
                converted
            })
            .collect())
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), ClientError> {
        match self
            .sqs_client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_receipt_handle_is_invalid()) =>
            {
                debug!(queue_url = %queue_url, "Receipt handle already invalid, nothing to delete");
                Ok(())
            }
            Err(err) => Err(ClientError::Service(DisplayErrorContext(&err).to_string())),
        }
    }

    async fn queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> Result<HashMap<String, String>, ClientError> {
        let request = attribute_names.iter().fold(
            self.sqs_client.get_queue_attributes().queue_url(queue_url),
            |request, name| request.attribute_names(QueueAttributeName::from(*name)),
        );

        let output = request
            .send()
            .await
            .map_err(|err| ClientError::Service(DisplayErrorContext(&err).to_string()))?;

        Ok(output
            .attributes()
            .map(|attributes| {
                attributes
                    .iter()
                    .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Converts an SDK message; deliveries without a receipt handle cannot be
/// acknowledged and yield `None`.
fn convert_message(message: &Message) -> Option<QueueMessage> {
    let receipt_handle = message.receipt_handle()?;

    let attributes = message
        .attributes()
        .map(|attributes| {
            attributes
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    let message_attributes = message
        .message_attributes()
        .map(|attributes| {
            attributes
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .string_value()
                        .map(|value| (name.clone(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(QueueMessage {
        message_id: message.message_id().unwrap_or_default().to_string(),
        receipt_handle: receipt_handle.to_string(),
        body: message.body().unwrap_or_default().to_string(),
        attributes,
        message_attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_sqs::types::MessageAttributeValue;

    #[test]
    fn converts_sdk_message_with_attributes() {
        let message = Message::builder()
            .message_id("m-1")
            .receipt_handle("rh-1")
            .body("{\"order\":1}")
            .attributes(MessageSystemAttributeName::ApproximateReceiveCount, "3")
            .message_attributes(
                "tenant",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value("acme")
                    .build()
                    .unwrap(),
            )
            .build();

        let converted = convert_message(&message).unwrap();
        assert_eq!(converted.message_id, "m-1");
        assert_eq!(converted.receipt_handle, "rh-1");
        assert_eq!(converted.body, "{\"order\":1}");
        assert_eq!(converted.receive_count(), Some(3));
        assert_eq!(converted.message_attributes.get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn message_without_receipt_handle_is_dropped() {
        let message = Message::builder().message_id("m-2").body("x").build();
        assert!(convert_message(&message).is_none());
    }

    #[test]
    fn missing_body_becomes_empty() {
        let message = Message::builder().receipt_handle("rh-3").build();
        let converted = convert_message(&message).unwrap();
        assert_eq!(converted.body, "");
        assert_eq!(converted.receive_count(), None);
    }
}
