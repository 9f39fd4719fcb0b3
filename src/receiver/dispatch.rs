//! Handler execution and the acknowledgement decision that follows it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::QueueRegistration;
use super::config::DispatchStrategy;
use crate::client::{QueueClient, QueueMessage};
use crate::errors::{HandlerError, ListenerError};
use crate::observer::{ErrorObserver, notify_observer};

/// Settled result of one handler execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Succeeded,
    Failed(HandlerError),
}

/// What happens to a delivery once its handler has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Delete the message from the queue.
    Delete,
    /// Keep the message; it becomes visible again when its visibility
    /// timeout lapses and the queue's redrive policy takes over.
    LeaveForRedelivery,
}

impl Acknowledgement {
    /// Successful messages are always deleted. Failed ones are only kept when
    /// the queue has a dead-letter target; otherwise they would be redelivered
    /// forever.
    pub fn for_outcome(outcome: &MessageOutcome, has_redrive_policy: bool) -> Self {
        match outcome {
            MessageOutcome::Succeeded => Acknowledgement::Delete,
            MessageOutcome::Failed(_) if has_redrive_policy => Acknowledgement::LeaveForRedelivery,
            MessageOutcome::Failed(_) => Acknowledgement::Delete,
        }
    }
}

/// Runs the handler of one queue and acknowledges its messages.
///
/// Shared by all executions of the queue. Each execution settles its own
/// message, so no coordination between executions is needed.
pub(crate) struct MessageExecutor {
    registration: Arc<QueueRegistration>,
    client: Arc<dyn QueueClient>,
    observer: Arc<dyn ErrorObserver>,
}

impl MessageExecutor {
    pub(crate) fn new(
        registration: Arc<QueueRegistration>,
        client: Arc<dyn QueueClient>,
        observer: Arc<dyn ErrorObserver>,
    ) -> Self {
        MessageExecutor {
            registration,
            client,
            observer,
        }
    }

    pub(crate) async fn execute(&self, message: QueueMessage) -> MessageOutcome {
        let outcome = self.invoke(&message).await;
        self.settle(&message, &outcome).await;
        outcome
    }

    /// Errors and panics raised by the handler stop here.
    async fn invoke(&self, message: &QueueMessage) -> MessageOutcome {
        let result = AssertUnwindSafe(self.registration.handler().handle(message))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => MessageOutcome::Succeeded,
            Ok(Err(err)) => MessageOutcome::Failed(err),
            Err(panic_info) => {
                let msg = panic_info
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
                    .or_else(|| panic_info.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                MessageOutcome::Failed(HandlerError::new(format!("handler panicked: {msg}")))
            }
        }
    }

    async fn settle(&self, message: &QueueMessage, outcome: &MessageOutcome) {
        let queue = self.registration.logical_name();

        if let MessageOutcome::Failed(err) = outcome {
            notify_observer(
                self.observer.as_ref(),
                queue,
                &ListenerError::HandlerFailure {
                    queue: queue.to_string(),
                    message_id: message.message_id.clone(),
                    source: err.clone(),
                },
            );
        }

        match Acknowledgement::for_outcome(outcome, self.registration.has_redrive_policy()) {
            Acknowledgement::Delete => {
                if let Err(source) = self
                    .client
                    .delete_message(self.registration.queue_url(), &message.receipt_handle)
                    .await
                {
                    notify_observer(
                        self.observer.as_ref(),
                        queue,
                        &ListenerError::Acknowledgement {
                            queue: queue.to_string(),
                            message_id: message.message_id.clone(),
                            source,
                        },
                    );
                } else {
                    debug!(
                        queue = %queue,
                        message_id = %message.message_id,
                        succeeded = matches!(outcome, MessageOutcome::Succeeded),
                        "Message deleted"
                    );
                }
            }
            Acknowledgement::LeaveForRedelivery => {
                debug!(
                    queue = %queue,
                    message_id = %message.message_id,
                    "Message left for redelivery"
                );
            }
        }
    }
}

/// Execution slots reserved for the messages of one receive call.
///
/// Unused slots go back to the pool when the reservation is dropped.
#[derive(Debug, Default)]
pub(crate) struct Reservation {
    permits: Option<OwnedSemaphorePermit>,
}

impl Reservation {
    pub(crate) fn slots(&self) -> usize {
        self.permits.as_ref().map_or(0, |p| p.num_permits())
    }

    fn take_one(&mut self) -> Option<OwnedSemaphorePermit> {
        let held = self.permits.as_mut()?;
        if held.num_permits() > 1 {
            held.split(1)
        } else {
            self.permits.take()
        }
    }
}

/// Runtime form of a [`DispatchStrategy`]. Cloned into every polling worker;
/// concurrent workers share one execution semaphore.
#[derive(Clone)]
pub(crate) enum Dispatcher {
    Synchronous,
    Concurrent {
        permits: Arc<Semaphore>,
        max_in_flight: usize,
    },
}

impl Dispatcher {
    pub(crate) fn from_strategy(strategy: DispatchStrategy) -> Self {
        match strategy {
            DispatchStrategy::Synchronous => Dispatcher::Synchronous,
            DispatchStrategy::Concurrent { max_in_flight } => Dispatcher::Concurrent {
                permits: Arc::new(Semaphore::new(max_in_flight)),
                max_in_flight,
            },
        }
    }

    /// Waits until a whole batch of `batch_size` messages can start right
    /// away, capped at the pool size, and takes those slots.
    pub(crate) async fn reserve(&self, batch_size: usize) -> Reservation {
        let Dispatcher::Concurrent {
            permits,
            max_in_flight,
        } = self
        else {
            return Reservation::default();
        };

        let wanted = batch_size.clamp(1, (*max_in_flight).max(1));
        let wanted = u32::try_from(wanted).unwrap_or(u32::MAX);
        match permits.clone().acquire_many_owned(wanted).await {
            Ok(permits) => Reservation {
                permits: Some(permits),
            },
            Err(err) => {
                warn!(error = %err, "Execution slots closed, receiving without a reservation");
                Reservation::default()
            }
        }
    }

    /// Hands a message to its executor.
    ///
    /// Synchronous dispatch returns after the message is settled. Concurrent
    /// dispatch spawns the execution into `in_flight` on a reserved slot and
    /// returns. Only when the batch is larger than the pool does a message
    /// wait here for a slot to free up.
    pub(crate) async fn dispatch(
        &self,
        executor: &Arc<MessageExecutor>,
        message: QueueMessage,
        reservation: &mut Reservation,
        in_flight: &mut JoinSet<MessageOutcome>,
    ) {
        match self {
            Dispatcher::Synchronous => {
                executor.execute(message).await;
            }
            Dispatcher::Concurrent { permits, .. } => {
                let permit = match reservation.take_one() {
                    Some(permit) => Ok(permit),
                    None => permits.clone().acquire_owned().await,
                };
                match permit {
                    Ok(permit) => {
                        let executor = executor.clone();
                        in_flight.spawn(async move {
                            let _permit = permit;
                            executor.execute(message).await
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "Execution slots closed, running message inline");
                        executor.execute(message).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_always_deleted() {
        assert_eq!(
            Acknowledgement::for_outcome(&MessageOutcome::Succeeded, true),
            Acknowledgement::Delete
        );
        assert_eq!(
            Acknowledgement::for_outcome(&MessageOutcome::Succeeded, false),
            Acknowledgement::Delete
        );
    }

    #[test]
    fn failure_depends_on_redrive_policy() {
        let failed = MessageOutcome::Failed(HandlerError::new("boom"));
        assert_eq!(
            Acknowledgement::for_outcome(&failed, true),
            Acknowledgement::LeaveForRedelivery
        );
        assert_eq!(
            Acknowledgement::for_outcome(&failed, false),
            Acknowledgement::Delete
        );
    }

    #[tokio::test]
    async fn reservation_waits_for_a_whole_batch() {
        let dispatcher = Dispatcher::from_strategy(DispatchStrategy::Concurrent { max_in_flight: 3 });
        let Dispatcher::Concurrent { permits, .. } = &dispatcher else {
            panic!("expected concurrent dispatcher");
        };

        let first = permits.clone().acquire_owned().await.unwrap();
        let second = permits.clone().acquire_owned().await.unwrap();
        let waiter = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.reserve(2).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished(), "one free slot must not satisfy a batch of two");

        drop(first);
        let reservation = waiter.await.unwrap();
        assert_eq!(reservation.slots(), 2);
        assert_eq!(permits.available_permits(), 0);
        drop(second);
    }

    #[tokio::test]
    async fn reservation_is_capped_at_the_pool_size() {
        let dispatcher = Dispatcher::from_strategy(DispatchStrategy::Concurrent { max_in_flight: 2 });
        let mut reservation = dispatcher.reserve(10).await;
        assert_eq!(reservation.slots(), 2);

        let first = reservation.take_one().unwrap();
        assert_eq!(first.num_permits(), 1);
        assert_eq!(reservation.slots(), 1);
        let second = reservation.take_one().unwrap();
        assert_eq!(second.num_permits(), 1);
        assert!(reservation.take_one().is_none());
    }

    #[tokio::test]
    async fn unused_slots_return_to_the_pool() {
        let dispatcher = Dispatcher::from_strategy(DispatchStrategy::Concurrent { max_in_flight: 4 });
        let Dispatcher::Concurrent { permits, .. } = &dispatcher else {
            panic!("expected concurrent dispatcher");
        };

        let mut reservation = dispatcher.reserve(3).await;
        assert_eq!(permits.available_permits(), 1);
        let used = reservation.take_one().unwrap();
        drop(reservation);
        assert_eq!(permits.available_permits(), 3);
        drop(used);
        assert_eq!(permits.available_permits(), 4);
    }

    #[tokio::test]
    async fn synchronous_dispatch_reserves_nothing() {
        let reservation = Dispatcher::Synchronous.reserve(10).await;
        assert_eq!(reservation.slots(), 0);
    }
}
