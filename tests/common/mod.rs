#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqs_listener_container::client::{QueueClient, QueueMessage, ReceiveRequest};
use sqs_listener_container::errors::{ClientError, ListenerError};
use sqs_listener_container::observer::ErrorObserver;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn queue_url(name: &str) -> String {
    format!("https://sqs.local/000000000000/{name}")
}

#[derive(Default)]
struct FakeQueue {
    pending: VecDeque<QueueMessage>,
    redrive_policy: bool,
    failing_receives: usize,
}

/// In-memory queue service recording every receive and delete call.
#[derive(Default)]
pub struct InMemoryQueueClient {
    queues: Mutex<HashMap<String, FakeQueue>>,
    receive_calls: Mutex<Vec<(String, ReceiveRequest)>>,
    deletes: Mutex<Vec<(String, String)>>,
    failing_attribute_fetch: AtomicBool,
    shutdown_called: AtomicBool,
    lookups: AtomicUsize,
    next_id: AtomicUsize,
}

impl InMemoryQueueClient {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryQueueClient::default())
    }

    pub fn add_queue(&self, name: &str, redrive_policy: bool) {
        self.queues.lock().unwrap().insert(
            queue_url(name),
            FakeQueue {
                redrive_policy,
                ..Default::default()
            },
        );
    }

    /// Enqueues messages and returns their ids.
    pub fn send(&self, name: &str, bodies: &[&str]) -> Vec<String> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.get_mut(&queue_url(name)).expect("queue exists");
        bodies
            .iter()
            .map(|body| {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let message =
                    QueueMessage::new(format!("msg-{n}"), format!("receipt-{n}"), *body);
                let id = message.message_id.clone();
                queue.pending.push_back(message);
                id
            })
            .collect()
    }

    pub fn fail_next_receives(&self, name: &str, count: usize) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get_mut(&queue_url(name)) {
            queue.failing_receives = count;
        }
    }

    pub fn fail_attribute_fetch(&self) {
        self.failing_attribute_fetch.store(true, Ordering::SeqCst);
    }

    pub fn receive_calls(&self, name: &str) -> Vec<ReceiveRequest> {
        let url = queue_url(name);
        self.receive_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(queue, _)| *queue == url)
            .map(|(_, request)| *request)
            .collect()
    }

    /// Receipt handles deleted from the queue, in deletion order.
    pub fn deleted(&self, name: &str) -> Vec<String> {
        let url = queue_url(name);
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .filter(|(queue, _)| *queue == url)
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Messages not yet handed out by a receive call.
    pub fn pending(&self, name: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(&queue_url(name))
            .map_or(0, |queue| queue.pending.len())
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn was_shut_down(&self) -> bool {
        self.shutdown_called.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn queue_url(&self, queue_name: &str) -> Result<Option<String>, ClientError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let url = queue_url(queue_name);
        Ok(self.queues.lock().unwrap().contains_key(&url).then_some(url))
    }

    async fn create_queue(&self, queue_name: &str) -> Result<String, ClientError> {
        let url = queue_url(queue_name);
        self.queues
            .lock()
            .unwrap()
            .entry(url.clone())
            .or_default();
        Ok(url)
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<QueueMessage>, ClientError> {
        self.receive_calls
            .lock()
            .unwrap()
            .push((queue_url.to_string(), *request));

        let batch = {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues
                .get_mut(queue_url)
                .ok_or_else(|| ClientError::QueueDoesNotExist(queue_url.to_string()))?;

            if queue.failing_receives > 0 {
                queue.failing_receives -= 1;
                return Err(ClientError::Service("connection reset".into()));
            }

            let take = (request.max_number_of_messages as usize).min(queue.pending.len());
            queue.pending.drain(..take).collect::<Vec<_>>()
        };

        if batch.is_empty() {
            // Stand-in for a long poll that timed out.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(batch)
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), ClientError> {
        self.deletes
            .lock()
            .unwrap()
            .push((queue_url.to_string(), receipt_handle.to_string()));
        Ok(())
    }

    async fn queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> Result<HashMap<String, String>, ClientError> {
        if self.failing_attribute_fetch.load(Ordering::SeqCst) {
            return Err(ClientError::Service("access denied".into()));
        }

        let queues = self.queues.lock().unwrap();
        let queue = queues
            .get(queue_url)
            .ok_or_else(|| ClientError::QueueDoesNotExist(queue_url.to_string()))?;

        let mut attributes = HashMap::new();
        if queue.redrive_policy && attribute_names.contains(&"RedrivePolicy") {
            attributes.insert(
                "RedrivePolicy".to_string(),
                r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:dlq","maxReceiveCount":3}"#
                    .to_string(),
            );
        }
        Ok(attributes)
    }

    async fn shutdown(&self) {
        self.shutdown_called.store(true, Ordering::SeqCst);
    }
}

/// Error observer remembering `(queue, error)` pairs.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    errors: Arc<Mutex<Vec<(String, String)>>>,
    handler_failures: Arc<AtomicUsize>,
    receive_failures: Arc<AtomicUsize>,
    unresolved: Arc<AtomicUsize>,
}

impl RecordingObserver {
    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn handler_failures(&self) -> usize {
        self.handler_failures.load(Ordering::SeqCst)
    }

    pub fn receive_failures(&self) -> usize {
        self.receive_failures.load(Ordering::SeqCst)
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved.load(Ordering::SeqCst)
    }
}

impl ErrorObserver for RecordingObserver {
    fn on_error(&self, queue: &str, error: &ListenerError) {
        match error {
            ListenerError::HandlerFailure { .. } => {
                self.handler_failures.fetch_add(1, Ordering::SeqCst);
            }
            ListenerError::TransientReceive { .. } => {
                self.receive_failures.fetch_add(1, Ordering::SeqCst);
            }
            ListenerError::UnresolvableDestination(_) => {
                self.unresolved.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        self.errors
            .lock()
            .unwrap()
            .push((queue.to_string(), error.to_string()));
    }
}

/// Polls `condition` until it holds, panicking after `limit`.
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within {limit:?}");
}
