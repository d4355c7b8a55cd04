use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use super::config::ContextConfig;
use super::context::{Context, ContextParams, StartupHook};
use crate::events::{Bus, Event, EventKind};
use crate::executor::{DefaultExecutorProvider, ExecutorProvider};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::workflow::{EndpointResolver, StaticResolver, Workflow};

/// Allocates the pluggable collaborators of a context during `build`.
pub trait ContextFactory: Send + Sync + 'static {
    fn executor_provider(&self, cfg: &ContextConfig) -> Arc<dyn ExecutorProvider> {
        Arc::new(DefaultExecutorProvider::new(cfg.executor_grace))
    }

    fn endpoint_resolver(&self, _cfg: &ContextConfig) -> Arc<dyn EndpointResolver> {
        Arc::new(StaticResolver::new())
    }
}

/// Default executors; endpoints from the given resolver or an empty [`StaticResolver`].
#[derive(Default)]
pub struct DefaultFactory {
    resolver: Option<Arc<dyn EndpointResolver>>,
}

impl DefaultFactory {
    pub fn with_resolver(resolver: Arc<dyn EndpointResolver>) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }
}

impl ContextFactory for DefaultFactory {
    fn endpoint_resolver(&self, _cfg: &ContextConfig) -> Arc<dyn EndpointResolver> {
        match &self.resolver {
            Some(resolver) => Arc::clone(resolver),
            None => Arc::new(StaticResolver::new()),
        }
    }
}

/// Builder for constructing a [`Context`] with optional features.
pub struct ContextBuilder {
    cfg: ContextConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    factory: Option<Arc<dyn ContextFactory>>,
    hooks: Vec<Arc<dyn StartupHook>>,
    workflows: Vec<Workflow>,

    #[cfg(feature = "supervising")]
    supervising: Option<crate::supervising::SupervisingConfig>,
    #[cfg(feature = "supervising")]
    health: Option<Arc<dyn crate::supervising::HealthSink>>,
}

impl ContextBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: ContextConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            factory: None,
            hooks: Vec::new(),
            workflows: Vec::new(),

            #[cfg(feature = "supervising")]
            supervising: None,
            #[cfg(feature = "supervising")]
            health: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the collaborator factory.
    pub fn with_factory(mut self, factory: Arc<dyn ContextFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Uses the default factory with `resolver` for endpoint resolution.
    pub fn with_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.factory = Some(Arc::new(DefaultFactory::with_resolver(resolver)));
        self
    }

    /// Adds a startup hook consulted during init.
    pub fn with_hook(mut self, hook: Arc<dyn StartupHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Adds a workflow materialized at init.
    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.workflows.push(workflow);
        self
    }

    /// Enables the supervising controller.
    ///
    /// Requires the `supervising` feature flag.
    #[cfg(feature = "supervising")]
    pub fn with_supervising(mut self, cfg: crate::supervising::SupervisingConfig) -> Self {
        self.supervising = Some(cfg);
        self
    }

    /// Health sink told about exhausted (and, if configured, restarting) workflows.
    #[cfg(feature = "supervising")]
    pub fn with_health_sink(mut self, sink: Arc<dyn crate::supervising::HealthSink>) -> Self {
        self.health = Some(sink);
        self
    }

    /// Builds the context.
    ///
    /// Must be called inside a tokio runtime: subscriber workers and the bus
    /// listener are spawned here.
    pub fn build(self) -> Arc<Context> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        if !subs.is_empty() {
            subscriber_listener(&bus, Arc::clone(&subs));
        }

        let ctx = Arc::new(Context::new_internal(ContextParams {
            cfg: self.cfg,
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(DefaultFactory::default())),
            hooks: self.hooks,
            bus,
            subs,
            workflows: self.workflows,
            #[cfg(feature = "supervising")]
            supervising: self.supervising,
            #[cfg(feature = "supervising")]
            health: self.health,
        }));
        ctx.build();
        ctx
    }
}

/// Forwards bus events to the subscriber set until the bus closes.
fn subscriber_listener(bus: &Bus, set: Arc<SubscriberSet>) {
    let mut rx = bus.subscribe();
    let bus = bus.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(ev),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "subscriber listener lagged behind the bus");
                    bus.publish(
                        Event::new(EventKind::SubscriberOverflow)
                            .with_workflow("listener")
                            .with_reason(format!("lagged by {missed} events")),
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
