//! # SQS Listener Container
//!
//! A managed polling and dispatch engine for AWS SQS. Declare "when a message
//! arrives on queue X, run handler Y" and the container takes care of the
//! polling loops.
//!
//! ## Features
//!
//! - One long-polling worker per registered queue, running on tokio
//! - Logical queue names resolved to queue urls once and cached
//! - Synchronous (in order, one at a time) or concurrent dispatch with a
//!   container-wide bound on in-flight handler executions
//! - Messages are deleted only after their handler settled; failed messages
//!   stay on queues with a redrive policy and are deleted on queues without
//! - Handler errors and panics are contained and reported to an
//!   [`ErrorObserver`](observer::ErrorObserver)
//! - Explicit lifecycle: `init`, `start`, `stop` (graceful drain), `destroy`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sqs_listener_container::{
//!     client::SqsQueueClient,
//!     container::ListenerContainer,
//!     receiver::{HandlerRegistry, QueueOptions, handler_fn},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shared_data = "shared state".to_string();
//!
//!     let mut registry = HandlerRegistry::new();
//!     registry.register(
//!         "orders",
//!         handler_fn(
//!             |message: String, shared: String| async move {
//!                 println!("Processing message: {} with shared: {}", message, shared);
//!                 Ok(())
//!             },
//!             shared_data,
//!         ),
//!         QueueOptions::default().with_max_number_of_messages(5),
//!     )?;
//!
//!     let container = ListenerContainer::builder()
//!         .client(SqsQueueClient::from_env().await)
//!         .registry(registry)
//!         .build()?;
//!
//!     container.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     container.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod attributes;
pub mod client;
pub mod container;
pub mod errors;
pub mod observer;
pub mod receiver;
pub mod resolver;

pub use container::{ContainerState, ListenerContainer, ListenerContainerBuilder};
pub use errors::{ConfigurationError, HandlerError, ListenerError};
