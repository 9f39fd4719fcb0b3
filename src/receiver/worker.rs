//! The receive / dispatch / acknowledge loop run for every registered queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use super::QueueRegistration;
use super::config::ContainerConfig;
use super::dispatch::{Dispatcher, MessageExecutor, MessageOutcome, Reservation};
use crate::client::{QueueClient, ReceiveRequest};
use crate::errors::ListenerError;
use crate::observer::{ErrorObserver, notify_observer};
use crate::resolver::DestinationResolver;

/// Long-running task polling one queue.
///
/// A stop signal is observed between cycles: an in-progress receive call is
/// allowed to return and the messages it fetched are dispatched before the
/// worker drains its in-flight executions and exits. Once stop is requested,
/// work on the current batch is bounded by the drain timeout.
pub(crate) struct PollingWorker {
    registration: Arc<QueueRegistration>,
    client: Arc<dyn QueueClient>,
    resolver: Arc<dyn DestinationResolver>,
    dispatcher: Dispatcher,
    executor: Arc<MessageExecutor>,
    observer: Arc<dyn ErrorObserver>,
    config: ContainerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl PollingWorker {
    pub(crate) fn new(
        registration: Arc<QueueRegistration>,
        client: Arc<dyn QueueClient>,
        resolver: Arc<dyn DestinationResolver>,
        dispatcher: Dispatcher,
        observer: Arc<dyn ErrorObserver>,
        config: ContainerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let executor = Arc::new(MessageExecutor::new(
            registration.clone(),
            client.clone(),
            observer.clone(),
        ));

        PollingWorker {
            registration,
            client,
            resolver,
            dispatcher,
            executor,
            observer,
            config,
            shutdown_rx,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow() || self.shutdown_rx.has_changed().is_err()
    }

    async fn run(mut self) {
        let queue = self.registration.logical_name().to_string();
        let request = self.registration.options().receive_request();
        let batch_size = usize::try_from(request.max_number_of_messages).unwrap_or(1);
        let mut in_flight: JoinSet<MessageOutcome> = JoinSet::new();
        let mut consecutive_errors: u32 = 0;

        info!(
            queue = %queue,
            queue_url = %self.registration.queue_url(),
            has_redrive_policy = self.registration.has_redrive_policy(),
            max_number_of_messages = request.max_number_of_messages,
            "Polling worker started"
        );

        loop {
            reap_completed(&queue, &mut in_flight);

            if self.stop_requested() {
                break;
            }

            // Fetched messages must not sit out their visibility timeout
            // waiting for an execution slot.
            let reservation = tokio::select! {
                reservation = self.dispatcher.reserve(batch_size) => reservation,
                _ = self.shutdown_rx.changed() => break,
            };

            let error = match self
                .poll_once(&queue, &request, reservation, &mut in_flight)
                .await
            {
                Ok(()) => {
                    consecutive_errors = 0;
                    continue;
                }
                Err(error) => error,
            };

            consecutive_errors = consecutive_errors.saturating_add(1);
            let backoff = self.config.receive_backoff(consecutive_errors);
            notify_observer(self.observer.as_ref(), &queue, &error);
            debug!(
                queue = %queue,
                consecutive_errors,
                backoff = ?backoff,
                "Backing off before next receive"
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        info!(queue = %queue, "Stop signal received, draining polling worker");
        drain(&queue, &mut in_flight, self.config.drain_timeout).await;
        info!(queue = %queue, "Polling worker stopped");
    }

    /// One cycle: resolve, receive, dispatch every received message.
    async fn poll_once(
        &self,
        queue: &str,
        request: &ReceiveRequest,
        mut reservation: Reservation,
        in_flight: &mut JoinSet<MessageOutcome>,
    ) -> Result<(), ListenerError> {
        let queue_url = self.resolver.resolve_destination(queue).await?;

        let messages = self
            .client
            .receive_messages(&queue_url, request)
            .await
            .map_err(|source| ListenerError::TransientReceive {
                queue: queue.to_string(),
                source,
            })?;

        if messages.is_empty() {
            trace!(queue = %queue, "No messages received");
            return Ok(());
        }

        debug!(
            queue = %queue,
            count = messages.len(),
            reserved_slots = reservation.slots(),
            "Received messages"
        );
        let batch = async {
            for message in messages {
                self.dispatcher
                    .dispatch(&self.executor, message, &mut reservation, in_flight)
                    .await;
            }
        };
        self.bounded_by_drain(queue, batch).await;
        Ok(())
    }

    /// Runs `work` to completion unless stop is requested and the drain
    /// timeout elapses first. Dropping `work` leaves its unsettled messages
    /// in the queue, where they become visible again.
    async fn bounded_by_drain<F>(&self, queue: &str, work: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(work);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::select! {
            _ = &mut work => return,
            _ = shutdown_rx.wait_for(|stop| *stop) => {}
        }

        match self.config.drain_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, work).await.is_err() {
                    warn!(
                        queue = %queue,
                        "Drain timeout, abandoning unsettled messages of the current batch"
                    );
                }
            }
            None => work.await,
        }
    }
}

fn reap_completed(queue: &str, in_flight: &mut JoinSet<MessageOutcome>) {
    while let Some(result) = in_flight.try_join_next() {
        if let Err(err) = result {
            warn!(queue = %queue, error = %err, "Message execution task failed");
        }
    }
}

/// Waits for in-flight executions, aborting those still running once
/// `drain_timeout` elapses. Aborted messages were not acknowledged and are
/// redelivered by the queue.
async fn drain(
    queue: &str,
    in_flight: &mut JoinSet<MessageOutcome>,
    drain_timeout: Option<Duration>,
) {
    if in_flight.is_empty() {
        return;
    }

    info!(queue = %queue, count = in_flight.len(), "Draining in-flight executions");

    let drained = async {
        while let Some(result) = in_flight.join_next().await {
            if let Err(err) = result {
                warn!(queue = %queue, error = %err, "Message execution task failed during drain");
            }
        }
    };

    match drain_timeout {
        Some(limit) => {
            if tokio::time::timeout(limit, drained).await.is_err() {
                warn!(
                    queue = %queue,
                    remaining = in_flight.len(),
                    "Drain timeout, aborting remaining executions"
                );
                in_flight.abort_all();
                while in_flight.join_next().await.is_some() {}
            }
        }
        None => drained.await,
    }
}
