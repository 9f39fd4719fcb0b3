use crate::client::QueueMessage;
use crate::errors::HandlerError;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for implementing asynchronous queue message handlers.
///
/// Returning `Ok(())` acknowledges the message. Returning an error, or
/// panicking, counts as a failed execution; whether the message is then
/// deleted depends on the redrive policy of its queue.
#[async_trait]
pub trait QueueMessageHandler: Send + Sync {
    /// Handles one delivered message.
    ///
    /// # Arguments
    ///
    /// * `message` - The delivery, including its body and attributes
    async fn handle(&self, message: &QueueMessage) -> Result<(), HandlerError>;
}

/// Handler built from a function receiving the message body and a clone of a
/// shared resource.
///
/// # Type Parameters
///
/// * `RFn` - The message handler function type
/// * `Fut` - The future returned by the handler function
/// * `TShared` - The type of shared resources passed to the handler
pub struct BodyHandlerFn<RFn, Fut, TShared> {
    rv_fn: RFn,
    shared_resources: TShared,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<RFn, Fut, TShared> QueueMessageHandler for BodyHandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(String, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn handle(&self, message: &QueueMessage) -> Result<(), HandlerError> {
        (self.rv_fn)(message.body.clone(), self.shared_resources.clone()).await
    }
}

/// Handler built from a function receiving the whole [`QueueMessage`] and a
/// clone of a shared resource.
pub struct MessageHandlerFn<RFn, Fut, TShared> {
    rv_fn: RFn,
    shared_resources: TShared,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<RFn, Fut, TShared> QueueMessageHandler for MessageHandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(QueueMessage, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn handle(&self, message: &QueueMessage) -> Result<(), HandlerError> {
        (self.rv_fn)(message.clone(), self.shared_resources.clone()).await
    }
}

/// Wraps a function taking the message body and a shared resource.
///
/// ```rust
/// use sqs_listener_container::receiver::handler_fn;
///
/// let handler = handler_fn(
///     |body: String, prefix: String| async move {
///         println!("{prefix}: {body}");
///         Ok(())
///     },
///     "orders".to_string(),
/// );
/// # let _ = handler;
/// ```
pub fn handler_fn<RFn, Fut, TShared>(
    rv_fn: RFn,
    shared_resources: TShared,
) -> BodyHandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(String, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    BodyHandlerFn {
        rv_fn,
        shared_resources,
        _future: PhantomData,
    }
}

/// Wraps a function taking the full message and a shared resource.
pub fn message_handler_fn<RFn, Fut, TShared>(
    rv_fn: RFn,
    shared_resources: TShared,
) -> MessageHandlerFn<RFn, Fut, TShared>
where
    RFn: Fn(QueueMessage, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    MessageHandlerFn {
        rv_fn,
        shared_resources,
        _future: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn body_handler_receives_body_and_shared_resource() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = handler_fn(
            |body: String, counter: Arc<AtomicUsize>| async move {
                counter.fetch_add(body.len(), Ordering::SeqCst);
                Ok(())
            },
            counter.clone(),
        );

        let message = QueueMessage::new("m-1", "rh-1", "abcd");
        handler.handle(&message).await.unwrap();
        handler.handle(&message).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn message_handler_sees_attributes() {
        let handler = message_handler_fn(
            |message: QueueMessage, expected: String| async move {
                match message.message_attributes.get("tenant") {
                    Some(tenant) if *tenant == expected => Ok(()),
                    _ => Err(HandlerError::new("unexpected tenant")),
                }
            },
            "acme".to_string(),
        );

        let mut message = QueueMessage::new("m-1", "rh-1", "{}");
        message
            .message_attributes
            .insert("tenant".into(), "acme".into());
        assert!(handler.handle(&message).await.is_ok());

        message
            .message_attributes
            .insert("tenant".into(), "other".into());
        assert_eq!(
            handler.handle(&message).await,
            Err(HandlerError::new("unexpected tenant"))
        );
    }
}
