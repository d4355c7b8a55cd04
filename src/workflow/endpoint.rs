//! # Endpoints and their resolution.
//!
//! - [`Endpoint`] a started service that creates the consumer feeding a workflow.
//! - [`EndpointResolver`] turns a URI into an endpoint (component resolution lives outside the core).
//! - [`StaticResolver`] resolver over a fixed set of endpoints.
//! - [`EndpointRegistry`] context-owned cache of started endpoints.
//!
//! ```text
//! WorkflowService::warm_up
//!    └─► EndpointRegistry::acquire(uri)
//!          ├─ cached?  → endpoint
//!          └─ resolver.resolve(uri) → endpoint.start() → cache
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::service::Service;
use crate::error::ServiceError;
use crate::pipeline::ProcessorRef;

/// Source of messages for a workflow.
pub trait Endpoint: Service {
    fn uri(&self) -> &str;

    /// Remote endpoints talk to something outside the process.
    fn is_remote(&self) -> bool {
        false
    }

    /// Creates the consumer that hands every received exchange to `processor`.
    fn create_consumer(&self, processor: ProcessorRef) -> Result<Arc<dyn Service>, ServiceError>;
}

pub type EndpointRef = Arc<dyn Endpoint>;

/// Resolves endpoint URIs.
#[async_trait]
pub trait EndpointResolver: Send + Sync + 'static {
    fn resolve(&self, uri: &str) -> Result<EndpointRef, ServiceError>;

    /// Releases resolver resources (components). Called after all endpoints stopped.
    async fn shutdown(&self) {}
}

/// Resolver over a fixed, pre-registered set of endpoints.
#[derive(Default)]
pub struct StaticResolver {
    endpoints: DashMap<String, EndpointRef>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, endpoint: EndpointRef) -> Self {
        self.register(endpoint);
        self
    }

    pub fn register(&self, endpoint: EndpointRef) {
        self.endpoints.insert(endpoint.uri().to_string(), endpoint);
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    fn resolve(&self, uri: &str) -> Result<EndpointRef, ServiceError> {
        self.endpoints
            .get(uri)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ServiceError::Unresolvable {
                uri: uri.to_string(),
                reason: "no endpoint registered".to_string(),
            })
    }
}

/// Cache of started endpoints owned by the context.
pub struct EndpointRegistry {
    resolver: Arc<dyn EndpointResolver>,
    started: DashMap<String, EndpointRef>,
}

impl EndpointRegistry {
    pub fn new(resolver: Arc<dyn EndpointResolver>) -> Self {
        Self {
            resolver,
            started: DashMap::new(),
        }
    }

    /// Returns the started endpoint for `uri`, resolving and starting it on first use.
    pub async fn acquire(&self, uri: &str) -> Result<EndpointRef, ServiceError> {
        if let Some(endpoint) = self.started.get(uri) {
            return Ok(Arc::clone(endpoint.value()));
        }
        let endpoint = self.resolver.resolve(uri)?;
        endpoint.start().await?;
        tracing::debug!(uri, remote = endpoint.is_remote(), "endpoint started");
        self.started.insert(uri.to_string(), Arc::clone(&endpoint));
        Ok(endpoint)
    }

    /// Returns `true` when the endpoint for `uri` is started.
    pub fn contains(&self, uri: &str) -> bool {
        self.started.contains_key(uri)
    }

    /// Stops and forgets the endpoint for `uri`.
    pub async fn release(&self, uri: &str) {
        if let Some((_, endpoint)) = self.started.remove(uri) {
            if let Err(err) = endpoint.stop().await {
                tracing::warn!(uri, error = %err, "failed to stop endpoint");
            }
        }
    }

    /// URIs of started endpoints, sorted.
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.started.iter().map(|e| e.key().clone()).collect();
        uris.sort_unstable();
        uris
    }

    /// Stops every endpoint, then releases the resolver.
    pub async fn shutdown(&self) {
        for uri in self.uris() {
            self.release(&uri).await;
        }
        self.resolver.shutdown().await;
    }
}
