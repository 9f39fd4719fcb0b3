//! Lifecycle management for the set of polling workers.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::attributes::QueueAttributeFetcher;
use crate::client::QueueClient;
use crate::errors::{ConfigurationError, ListenerError};
use crate::observer::{ErrorObserver, TracingErrorObserver, notify_observer};
use crate::receiver::{
    ContainerConfig, Dispatcher, HandlerBinding, HandlerRegistry, PollingWorker, QueueMessageHandler,
    QueueOptions, QueueRegistration,
};
use crate::resolver::{CachingDestinationResolver, DestinationResolver, QueueUrlDestinationResolver};

/// Lifecycle state of a [`ListenerContainer`].
///
/// ```text
/// Created --init--> Initializing --> ActiveStopped <--start/stop--> ActiveRunning
///                                          |                             |
///                                          +----------destroy------------+--> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Initializing,
    ActiveStopped,
    ActiveRunning,
    Destroyed,
}

/// State only touched while holding the lifecycle lock.
struct Lifecycle {
    registry: HandlerRegistry,
    registrations: Vec<Arc<QueueRegistration>>,
    failed_queues: Vec<String>,
    workers: Vec<(String, JoinHandle<()>)>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

/// Runs one polling worker per registered queue and manages their lifecycle.
///
/// All transitions are serialized by a single lock. `stop` returns only once
/// every worker has drained its in-flight executions.
///
/// ```rust,no_run
/// use sqs_listener_container::{
///     client::SqsQueueClient,
///     container::ListenerContainer,
///     receiver::{QueueOptions, handler_fn},
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let container = ListenerContainer::builder()
///         .client(SqsQueueClient::from_env().await)
///         .build()?;
///
///     container
///         .register_handler(
///             "orders",
///             handler_fn(
///                 |body: String, _shared: ()| async move {
///                     println!("order: {body}");
///                     Ok(())
///                 },
///                 (),
///             ),
///             QueueOptions::default(),
///         )
///         .await?;
///
///     container.start().await?;
///     tokio::signal::ctrl_c().await?;
///     container.destroy().await?;
///     Ok(())
/// }
/// ```
pub struct ListenerContainer {
    client: Arc<dyn QueueClient>,
    resolver: Arc<dyn DestinationResolver>,
    observer: Arc<dyn ErrorObserver>,
    config: ContainerConfig,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<ContainerState>,
    lifecycle: Mutex<Lifecycle>,
}

impl ListenerContainer {
    pub fn builder() -> ListenerContainerBuilder {
        ListenerContainerBuilder::default()
    }

    pub fn state(&self) -> ContainerState {
        *self.state_tx.borrow()
    }

    /// True while the polling workers run. Stays true until `stop` has
    /// drained every worker.
    pub fn is_running(&self) -> bool {
        self.state() == ContainerState::ActiveRunning
    }

    /// Binds a handler to a logical queue name. Only allowed before the
    /// container initializes.
    pub async fn register_handler<H>(
        &self,
        queue_name: &str,
        handler: H,
        options: QueueOptions,
    ) -> Result<(), ListenerError>
    where
        H: QueueMessageHandler + 'static,
    {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ContainerState::Destroyed => Err(ListenerError::ContainerClosed),
            ContainerState::Created => lifecycle.registry.register(queue_name, handler, options),
            _ => Err(ListenerError::RegistrationClosed),
        }
    }

    /// Resolves every registered queue and fetches its redrive policy.
    ///
    /// Queues whose destination cannot be resolved are reported to the error
    /// observer and skipped; see [`failed_queues`](Self::failed_queues). A
    /// failed attribute fetch aborts initialization and leaves the container
    /// in [`ContainerState::Created`]. Calling `init` on an initialized
    /// container does nothing.
    pub async fn init(&self) -> Result<(), ListenerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.init_locked(&mut lifecycle).await
    }

    /// Starts one polling worker per queue, initializing first if needed.
    /// Starting a running container does nothing.
    pub async fn start(&self) -> Result<(), ListenerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ContainerState::Destroyed => return Err(ListenerError::ContainerClosed),
            ContainerState::ActiveRunning => return Ok(()),
            ContainerState::Created | ContainerState::Initializing => {
                self.init_locked(&mut lifecycle).await?
            }
            ContainerState::ActiveStopped => {}
        }

        let (shutdown_tx, _) = watch::channel(false);
        let workers: Vec<_> = lifecycle
            .registrations
            .iter()
            .map(|registration| {
                let worker = PollingWorker::new(
                    registration.clone(),
                    self.client.clone(),
                    self.resolver.clone(),
                    self.dispatcher.clone(),
                    self.observer.clone(),
                    self.config.clone(),
                    shutdown_tx.subscribe(),
                );
                (registration.logical_name().to_string(), worker.spawn())
            })
            .collect();

        lifecycle.workers = workers;
        lifecycle.shutdown_tx = Some(shutdown_tx);
        self.state_tx.send_replace(ContainerState::ActiveRunning);
        info!(queue_count = lifecycle.workers.len(), "Listener container started");
        Ok(())
    }

    /// Signals every worker to stop and waits until all of them drained.
    /// Stopping a container that is not running does nothing.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ContainerState::Destroyed => Err(ListenerError::ContainerClosed),
            ContainerState::ActiveRunning => {
                self.stop_locked(&mut lifecycle).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Stops the container if needed and releases the client and resolver
    /// cache. Every later lifecycle call fails with
    /// [`ListenerError::ContainerClosed`].
    pub async fn destroy(&self) -> Result<(), ListenerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ContainerState::Destroyed => return Err(ListenerError::ContainerClosed),
            ContainerState::ActiveRunning => self.stop_locked(&mut lifecycle).await,
            _ => {}
        }

        self.resolver.clear().await;
        self.client.shutdown().await;
        lifecycle.registrations.clear();
        self.state_tx.send_replace(ContainerState::Destroyed);
        info!("Listener container destroyed");
        Ok(())
    }

    /// Queues that are polled once the container runs.
    pub async fn registered_queues(&self) -> Vec<Arc<QueueRegistration>> {
        self.lifecycle.lock().await.registrations.clone()
    }

    /// Logical names whose destination could not be resolved during `init`.
    pub async fn failed_queues(&self) -> Vec<String> {
        self.lifecycle.lock().await.failed_queues.clone()
    }

    async fn init_locked(&self, lifecycle: &mut Lifecycle) -> Result<(), ListenerError> {
        match self.state() {
            ContainerState::Destroyed => return Err(ListenerError::ContainerClosed),
            ContainerState::Created | ContainerState::Initializing => {}
            ContainerState::ActiveStopped | ContainerState::ActiveRunning => return Ok(()),
        }

        self.state_tx.send_replace(ContainerState::Initializing);
        debug!(queue_count = lifecycle.registry.len(), "Initializing listener container");

        match self.probe_queues(&lifecycle.registry).await {
            Ok((registrations, failed_queues)) => {
                info!(
                    queue_count = registrations.len(),
                    failed_count = failed_queues.len(),
                    "Listener container initialized"
                );
                lifecycle.registrations = registrations;
                lifecycle.failed_queues = failed_queues;
                self.state_tx.send_replace(ContainerState::ActiveStopped);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Listener container initialization failed");
                self.state_tx.send_replace(ContainerState::Created);
                Err(err)
            }
        }
    }

    /// Resolves and inspects all queues concurrently.
    async fn probe_queues(
        &self,
        registry: &HandlerRegistry,
    ) -> Result<(Vec<Arc<QueueRegistration>>, Vec<String>), ListenerError> {
        let fetcher = QueueAttributeFetcher::new(self.client.clone());

        let probes = registry.iter().map(|(name, binding)| {
            let fetcher = &fetcher;
            async move { (name, self.probe_queue(fetcher, name, binding).await) }
        });
        let results = futures::future::join_all(probes).await;

        let mut registrations = Vec::with_capacity(results.len());
        let mut failed_queues = Vec::new();
        for (name, result) in results {
            match result {
                Ok(registration) => registrations.push(Arc::new(registration)),
                Err(
                    err @ (ListenerError::UnresolvableDestination(_)
                    | ListenerError::Resolution { .. }),
                ) => {
                    warn!(queue = %name, error = %err, "Skipping queue that could not be resolved");
                    notify_observer(self.observer.as_ref(), name, &err);
                    failed_queues.push(name.to_string());
                }
                Err(err) => return Err(err),
            }
        }

        Ok((registrations, failed_queues))
    }

    async fn probe_queue(
        &self,
        fetcher: &QueueAttributeFetcher,
        name: &str,
        binding: &HandlerBinding,
    ) -> Result<QueueRegistration, ListenerError> {
        let queue_url = self.resolver.resolve_destination(name).await?;
        let has_redrive_policy = fetcher.fetch_redrive_policy_presence(&queue_url).await?;
        Ok(QueueRegistration::new(
            name,
            queue_url,
            has_redrive_policy,
            binding,
        ))
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        info!(queue_count = lifecycle.workers.len(), "Stopping listener container");
        if let Some(shutdown_tx) = lifecycle.shutdown_tx.take() {
            shutdown_tx.send_replace(true);
        }

        for (queue, handle) in lifecycle.workers.drain(..) {
            if let Err(err) = handle.await {
                error!(queue = %queue, error = %err, "Polling worker terminated abnormally");
            }
        }

        self.state_tx.send_replace(ContainerState::ActiveStopped);
        info!("Listener container stopped");
    }
}

impl Drop for ListenerContainer {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Listener container dropped while running; workers stop after their current cycle");
        }
    }
}

/// Builder for [`ListenerContainer`].
#[derive(Default)]
pub struct ListenerContainerBuilder {
    client: Option<Arc<dyn QueueClient>>,
    resolver: Option<Arc<dyn DestinationResolver>>,
    observer: Option<Arc<dyn ErrorObserver>>,
    registry: HandlerRegistry,
    config: ContainerConfig,
}

impl ListenerContainerBuilder {
    /// The queue client shared by every worker. Required.
    pub fn client<C>(self, client: C) -> Self
    where
        C: QueueClient + 'static,
    {
        self.shared_client(Arc::new(client))
    }

    pub fn shared_client(mut self, client: Arc<dyn QueueClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Overrides the default caching queue url resolver.
    pub fn resolver<R>(mut self, resolver: R) -> Self
    where
        R: DestinationResolver + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Starts from an already populated registry.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Receives contained failures. Defaults to [`TracingErrorObserver`].
    pub fn error_observer<O>(mut self, observer: O) -> Self
    where
        O: ErrorObserver + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> Result<ListenerContainer, ListenerError> {
        let client = self.client.ok_or(ConfigurationError::MissingClient)?;
        self.config.validate()?;

        let resolver = self.resolver.unwrap_or_else(|| {
            Arc::new(CachingDestinationResolver::new(
                QueueUrlDestinationResolver::new(client.clone())
                    .with_auto_create(self.config.auto_create_queues),
            ))
        });
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingErrorObserver));
        let (state_tx, _) = watch::channel(ContainerState::Created);

        Ok(ListenerContainer {
            client,
            resolver,
            observer,
            dispatcher: Dispatcher::from_strategy(self.config.dispatch),
            config: self.config,
            state_tx,
            lifecycle: Mutex::new(Lifecycle {
                registry: self.registry,
                registrations: Vec::new(),
                failed_queues: Vec::new(),
                workers: Vec::new(),
                shutdown_tx: None,
            }),
        })
    }
}
