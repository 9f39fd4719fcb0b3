//! Visibility for failures that are contained inside the container.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{error, warn};

use crate::errors::ListenerError;

/// Receives failures that never propagate to a lifecycle caller: handler
/// failures, transient receive errors, failed deletions and destinations
/// that could not be resolved during initialization.
///
/// Observers are invoked from polling workers and handler executions, so
/// they must not block. A panicking observer is logged and otherwise
/// ignored; the worker and the message acknowledgement carry on.
pub trait ErrorObserver: Send + Sync {
    fn on_error(&self, queue: &str, error: &ListenerError);
}

/// Logs every observed failure through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorObserver;

impl ErrorObserver for TracingErrorObserver {
    fn on_error(&self, queue: &str, error: &ListenerError) {
        match error {
            ListenerError::TransientReceive { .. } => {
                warn!(queue = %queue, error = %error, "Transient receive failure");
            }
            _ => {
                error!(queue = %queue, error = %error, "Listener failure");
            }
        }
    }
}

impl<F> ErrorObserver for F
where
    F: Fn(&str, &ListenerError) + Send + Sync,
{
    fn on_error(&self, queue: &str, error: &ListenerError) {
        self(queue, error)
    }
}

/// Reports `error` to `observer`, containing a panic raised by the observer.
pub(crate) fn notify_observer(observer: &dyn ErrorObserver, queue: &str, error: &ListenerError) {
    if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| observer.on_error(queue, error))) {
        let msg = panic_info
            .downcast_ref::<String>()
            .map(|s| s.as_str())
            .or_else(|| panic_info.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        error!(queue = %queue, error = %error, panic = %msg, "Error observer panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_observers() {
        let calls = AtomicUsize::new(0);
        let observer = |queue: &str, _error: &ListenerError| {
            assert_eq!(queue, "orders");
            calls.fetch_add(1, Ordering::SeqCst);
        };
        notify_observer(&observer, "orders", &ListenerError::ContainerClosed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct ExplodingObserver;

    impl ErrorObserver for ExplodingObserver {
        fn on_error(&self, _queue: &str, _error: &ListenerError) {
            panic!("observer exploded");
        }
    }

    #[test]
    fn panicking_observer_is_contained() {
        notify_observer(&ExplodingObserver, "orders", &ListenerError::ContainerClosed);
    }
}
