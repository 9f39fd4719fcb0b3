//! Logical queue name to queue url resolution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::QueueClient;
use crate::errors::ListenerError;

/// Resolves a logical destination name to the physical queue url.
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    async fn resolve_destination(&self, name: &str) -> Result<String, ListenerError>;

    /// Forgets any cached resolutions.
    async fn clear(&self) {}
}

/// Looks queue urls up through the queue client.
///
/// Names that already are urls are returned unchanged. With `auto_create`
/// enabled, missing queues are created instead of being reported as
/// unresolvable.
pub struct QueueUrlDestinationResolver {
    client: Arc<dyn QueueClient>,
    auto_create: bool,
}

impl QueueUrlDestinationResolver {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        QueueUrlDestinationResolver {
            client,
            auto_create: false,
        }
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }
}

#[async_trait]
impl DestinationResolver for QueueUrlDestinationResolver {
    async fn resolve_destination(&self, name: &str) -> Result<String, ListenerError> {
        if name.starts_with("http://") || name.starts_with("https://") {
            return Ok(name.to_string());
        }

        if self.auto_create {
            return self
                .client
                .create_queue(name)
                .await
                .map_err(|source| ListenerError::Resolution {
                    name: name.to_string(),
                    source,
                });
        }

        match self.client.queue_url(name).await {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Err(ListenerError::UnresolvableDestination(name.to_string())),
            Err(source) => Err(ListenerError::Resolution {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// Caches successful resolutions of the wrapped resolver for the lifetime
/// of the cache. Failures are not cached.
pub struct CachingDestinationResolver<R> {
    inner: R,
    cache: RwLock<HashMap<String, String>>,
}

impl<R> CachingDestinationResolver<R>
where
    R: DestinationResolver,
{
    pub fn new(inner: R) -> Self {
        CachingDestinationResolver {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[async_trait]
impl<R> DestinationResolver for CachingDestinationResolver<R>
where
    R: DestinationResolver,
{
    async fn resolve_destination(&self, name: &str) -> Result<String, ListenerError> {
        if let Some(url) = self.cache.read().await.get(name) {
            return Ok(url.clone());
        }

        let url = self.inner.resolve_destination(name).await?;
        debug!(queue = %name, queue_url = %url, "Resolved destination");
        self.cache
            .write()
            .await
            .insert(name.to_string(), url.clone());
        Ok(url)
    }

    async fn clear(&self) {
        self.cache.write().await.clear();
        self.inner.clear().await;
    }
}
