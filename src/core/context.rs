//! # Context: the lifecycle state machine of the engine.
//!
//! A [`Context`] owns the workflow registry, the shutdown coordinator, the
//! endpoint cache, the executor provider and (optionally) the supervising
//! controller, and sequences them through build → init → start → stop, plus
//! suspend/resume.
//!
//! ## Lifecycle
//! ```text
//! Created ──build──► Built ──init──► Initialized ──start──► Starting ──► Started
//!                              │                               │            │  ▲
//!                              │ veto                          │ error      │  └──resume── Suspended
//!                              ▼                               ▼            └──suspend──► Suspending ─┘
//!                            Failed ◄──────────────────────── Failed
//!                                                                 Started/Suspended/Failed ──stop──► Stopping ──► Stopped
//! ```
//!
//! ## Stop sequence
//! ```text
//! registry.stop_all()        force-drain workflows, stop consumers and nested services
//! endpoints.shutdown()       stop endpoints, then release the resolver
//! release_advice_infra()     drop pooled continuations
//! executors.shutdown_all()   release worker pools last
//! ```
//!
//! ## Rules
//! - Every transition is phase-guarded: a second `start` is a no-op, `stop` before `start` is a no-op.
//! - Startup hooks run once per successful init; a veto either rethrows or leaves the context `Failed`.
//! - A failed start releases everything it acquired; the next `start` retries from a clean state.
//! - The first start always starts workflows; restarts after a stop honor `auto_startup`.
//! - `suspend`/`resume` only touch the workflows that were started at suspend time.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::builder::ContextFactory;
use super::config::{ContextConfig, PoolProfile};
use super::inflight::InflightTracker;
use super::registry::WorkflowRegistry;
use super::shutdown::{ShutdownCoordinator, ShutdownFlag};
use super::signals::wait_for_shutdown_signal;
use crate::error::{ContextError, VetoStartup, WorkflowError};
use crate::events::{Bus, Event, EventKind};
use crate::executor::{ExecutorProvider, ManagedPool};
use crate::subscribers::SubscriberSet;
use crate::workflow::{EndpointRegistry, ServiceStatus, Workflow, WorkflowService, WorkflowStartupOrder};

#[cfg(feature = "supervising")]
use crate::supervising::{HealthSink, SupervisingConfig, SupervisingController};

/// Status of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    Created,
    Built,
    Initialized,
    Starting,
    Started,
    Suspending,
    Suspended,
    Stopping,
    Stopped,
    Failed,
}

impl ContextStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextStatus::Created => "created",
            ContextStatus::Built => "built",
            ContextStatus::Initialized => "initialized",
            ContextStatus::Starting => "starting",
            ContextStatus::Started => "started",
            ContextStatus::Suspending => "suspending",
            ContextStatus::Suspended => "suspended",
            ContextStatus::Stopping => "stopping",
            ContextStatus::Stopped => "stopped",
            ContextStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status cell shared with collaborators that must observe the context (e.g. retries).
#[derive(Debug)]
pub struct ContextState {
    status: RwLock<ContextStatus>,
    run_allowed: AtomicBool,
}

impl ContextState {
    fn new() -> Self {
        Self {
            status: RwLock::new(ContextStatus::Created),
            run_allowed: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ContextStatus {
        *self.status.read()
    }

    /// `false` once a stop began; background work must not start workflows anymore.
    pub fn is_run_allowed(&self) -> bool {
        self.run_allowed.load(Ordering::Acquire)
    }

    fn set(&self, to: ContextStatus) {
        let from = std::mem::replace(&mut *self.status.write(), to);
        if from != to {
            tracing::debug!(%from, %to, "context status");
        }
    }

    fn allow_run(&self, allowed: bool) {
        self.run_allowed.store(allowed, Ordering::Release);
    }
}

/// Hook consulted during init; may veto startup.
pub trait StartupHook: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn on_init(&self, ctx: &Context) -> Result<(), VetoStartup>;
}

/// Collaborators allocated by `build`.
struct Parts {
    executors: Arc<dyn ExecutorProvider>,
    endpoints: Arc<EndpointRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    registry: Arc<WorkflowRegistry>,
}

/// Message-routing engine context.
pub struct Context {
    cfg: ContextConfig,
    factory: Arc<dyn ContextFactory>,
    hooks: Vec<Arc<dyn StartupHook>>,
    state: Arc<ContextState>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    inflight: Arc<InflightTracker>,
    flag: ShutdownFlag,
    lifecycle: tokio::sync::Mutex<()>,
    pending: Mutex<Vec<Workflow>>,
    suspended: Mutex<Vec<Arc<str>>>,
    initialized: AtomicBool,
    started_once: AtomicBool,
    parts: OnceLock<Parts>,

    #[cfg(feature = "supervising")]
    supervising: Option<SupervisingConfig>,
    #[cfg(feature = "supervising")]
    health: Option<Arc<dyn HealthSink>>,
    #[cfg(feature = "supervising")]
    controller: OnceLock<Arc<SupervisingController>>,
}

/// Internal construction parameters, filled by [`ContextBuilder`](crate::ContextBuilder).
pub(crate) struct ContextParams {
    pub cfg: ContextConfig,
    pub factory: Arc<dyn ContextFactory>,
    pub hooks: Vec<Arc<dyn StartupHook>>,
    pub bus: Bus,
    pub subs: Arc<SubscriberSet>,
    pub workflows: Vec<Workflow>,
    #[cfg(feature = "supervising")]
    pub supervising: Option<SupervisingConfig>,
    #[cfg(feature = "supervising")]
    pub health: Option<Arc<dyn HealthSink>>,
}

impl Context {
    pub(crate) fn new_internal(p: ContextParams) -> Self {
        Self {
            cfg: p.cfg,
            factory: p.factory,
            hooks: p.hooks,
            state: Arc::new(ContextState::new()),
            bus: p.bus,
            subs: p.subs,
            inflight: Arc::new(InflightTracker::new()),
            flag: ShutdownFlag::default(),
            lifecycle: tokio::sync::Mutex::new(()),
            pending: Mutex::new(p.workflows),
            suspended: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            started_once: AtomicBool::new(false),
            parts: OnceLock::new(),

            #[cfg(feature = "supervising")]
            supervising: p.supervising,
            #[cfg(feature = "supervising")]
            health: p.health,
            #[cfg(feature = "supervising")]
            controller: OnceLock::new(),
        }
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Allocates collaborators through the factory. Idempotent; starts nothing.
    pub fn build(&self) {
        self.parts();
        if self.state.status() == ContextStatus::Created {
            self.state.set(ContextStatus::Built);
        }
    }

    fn parts(&self) -> &Parts {
        self.parts.get_or_init(|| {
            let executors = self.factory.executor_provider(&self.cfg);
            let endpoints = Arc::new(EndpointRegistry::new(self.factory.endpoint_resolver(&self.cfg)));
            let coordinator = Arc::new(ShutdownCoordinator::new(
                self.cfg.shutdown.clone(),
                Arc::clone(&self.inflight),
                self.bus.clone(),
                ManagedPool::new(Arc::clone(&executors), "shutdown", PoolProfile::single()),
                self.flag.clone(),
            ));
            let registry = Arc::new(WorkflowRegistry::new(
                Arc::clone(&coordinator),
                Arc::clone(&endpoints),
                Arc::clone(&self.inflight),
                self.cfg.pipeline.clone(),
                self.bus.clone(),
            ));
            tracing::debug!(context = %self.cfg.name, "context built");
            Parts {
                executors,
                endpoints,
                coordinator,
                registry,
            }
        })
    }

    /// Runs startup hooks and materializes pending workflows.
    pub async fn init(&self) -> Result<(), ContextError> {
        let _guard = self.lifecycle.lock().await;
        self.init_locked().await.map(|_| ())
    }

    /// Returns `Ok(false)` when a hook vetoed startup without asking to rethrow.
    async fn init_locked(&self) -> Result<bool, ContextError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(true);
        }
        match self.state.status() {
            status @ (ContextStatus::Stopping | ContextStatus::Suspending | ContextStatus::Starting) => {
                return Err(ContextError::InvalidState { op: "init", status });
            }
            _ => {}
        }
        self.build();

        for hook in &self.hooks {
            if let Err(veto) = hook.on_init(self) {
                tracing::warn!(context = %self.cfg.name, hook = hook.name(), reason = %veto.reason, "context startup vetoed");
                self.state.set(ContextStatus::Failed);
                self.bus.publish(
                    Event::new(EventKind::ContextStartupFailed).with_reason(veto.to_string()),
                );
                return if veto.rethrow {
                    Err(ContextError::Vetoed { reason: veto.reason })
                } else {
                    Ok(false)
                };
            }
        }

        #[cfg(feature = "supervising")]
        self.init_controller()?;

        let pending: Vec<Workflow> = std::mem::take(&mut *self.pending.lock());
        for workflow in pending {
            self.register(workflow)?;
        }

        self.initialized.store(true, Ordering::Release);
        self.state.set(ContextStatus::Initialized);
        Ok(true)
    }

    #[cfg(feature = "supervising")]
    fn init_controller(&self) -> Result<(), ContextError> {
        let Some(cfg) = &self.supervising else {
            return Ok(());
        };
        if self.controller.get().is_some() {
            return Ok(());
        }
        let parts = self.parts();
        let controller = SupervisingController::new(
            cfg.clone(),
            Arc::clone(&parts.registry),
            Arc::clone(&self.state),
            Arc::clone(&parts.executors),
            self.bus.clone(),
            self.health.clone(),
        )?;
        let _ = self.controller.set(controller);
        Ok(())
    }

    fn register(&self, workflow: Workflow) -> Result<Arc<WorkflowService>, ContextError> {
        let service = self.parts().registry.register(workflow)?;
        #[cfg(feature = "supervising")]
        if let Some(controller) = self.controller.get() {
            controller.attach(&service);
        }
        Ok(service)
    }

    /// Starts the context and its workflows in ascending rank.
    pub async fn start(&self) -> Result<(), ContextError> {
        let _guard = self.lifecycle.lock().await;
        match self.state.status() {
            ContextStatus::Started => return Ok(()),
            ContextStatus::Suspended => return self.resume_locked().await,
            status @ (ContextStatus::Starting | ContextStatus::Stopping | ContextStatus::Suspending) => {
                return Err(ContextError::InvalidState { op: "start", status });
            }
            _ => {}
        }
        if !self.init_locked().await? {
            return Ok(());
        }

        let parts = self.parts();
        self.state.set(ContextStatus::Starting);
        self.bus.publish(Event::new(EventKind::ContextStarting));
        tracing::info!(context = %self.cfg.name, workflows = parts.registry.len(), "context starting");

        self.state.allow_run(true);
        self.flag.reset();
        let first = !self.started_once.load(Ordering::Acquire);

        parts.registry.begin_bootstrap();
        let started = if first || self.cfg.auto_startup {
            self.start_workflows().await
        } else {
            tracing::info!(context = %self.cfg.name, "auto-startup disabled; workflows not started");
            Ok(())
        };

        match started {
            Ok(()) => {
                parts.registry.mark_started();
                self.started_once.store(true, Ordering::Release);
                self.state.set(ContextStatus::Started);
                tracing::info!(context = %self.cfg.name, "context started");
                self.bus.publish(Event::new(EventKind::ContextStarted));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(context = %self.cfg.name, error = %err, "context failed to start");
                self.bus.publish(
                    Event::new(EventKind::ContextStartupFailed).with_reason(err.to_string()),
                );
                self.state.allow_run(false);
                if let Err(cleanup) = self.release().await {
                    tracing::warn!(context = %self.cfg.name, error = %cleanup, "cleanup after failed start");
                }
                self.started_once.store(false, Ordering::Release);
                self.state.set(ContextStatus::Failed);
                Err(err)
            }
        }
    }

    async fn start_workflows(&self) -> Result<(), ContextError> {
        #[cfg(feature = "supervising")]
        if let Some(controller) = self.controller.get() {
            return controller.start_workflows().await;
        }
        self.parts().registry.start_all().await
    }

    /// Force-drains all workflows (bounded by the shutdown timeout) and releases every resource.
    pub async fn stop(&self) -> Result<(), ContextError> {
        let _guard = self.lifecycle.lock().await;
        match self.state.status() {
            ContextStatus::Started | ContextStatus::Suspended | ContextStatus::Failed => {}
            _ => return Ok(()),
        }

        self.state.set(ContextStatus::Stopping);
        self.state.allow_run(false);
        self.bus.publish(Event::new(EventKind::ContextStopping));
        tracing::info!(context = %self.cfg.name, "context stopping");

        #[cfg(feature = "supervising")]
        if let Some(controller) = self.controller.get() {
            controller.stop();
        }

        let result = self.release().await;
        self.suspended.lock().clear();
        self.state.set(ContextStatus::Stopped);
        tracing::info!(context = %self.cfg.name, "context stopped");
        self.bus.publish(Event::new(EventKind::ContextStopped));
        result
    }

    /// Releases resources in fixed order; later steps run even if an earlier one failed.
    async fn release(&self) -> Result<(), ContextError> {
        let Some(parts) = self.parts.get() else {
            return Ok(());
        };
        let drained = parts.registry.stop_all().await;
        parts.registry.mark_stopped();
        parts.endpoints.shutdown().await;
        parts.registry.release_advice_infra();
        parts.executors.shutdown_all().await;
        drained.map(|outcome| {
            tracing::debug!(?outcome, "workflows drained");
        })
    }

    /// Suspends every started workflow; `resume` restores exactly that set.
    pub async fn suspend(&self) -> Result<(), ContextError> {
        let _guard = self.lifecycle.lock().await;
        if self.state.status() != ContextStatus::Started {
            return Ok(());
        }
        self.state.set(ContextStatus::Suspending);
        self.bus.publish(Event::new(EventKind::ContextSuspending));

        match self.parts().registry.suspend_all(None).await {
            Ok(ids) => {
                tracing::info!(context = %self.cfg.name, workflows = ids.len(), "context suspended");
                *self.suspended.lock() = ids;
                self.state.set(ContextStatus::Suspended);
                self.bus.publish(Event::new(EventKind::ContextSuspended));
                Ok(())
            }
            Err(err) => {
                self.state.set(ContextStatus::Started);
                Err(err)
            }
        }
    }

    /// Resumes the workflows suspended by [`suspend`](Self::suspend).
    pub async fn resume(&self) -> Result<(), ContextError> {
        let _guard = self.lifecycle.lock().await;
        self.resume_locked().await
    }

    async fn resume_locked(&self) -> Result<(), ContextError> {
        if self.state.status() != ContextStatus::Suspended {
            return Ok(());
        }
        self.bus.publish(Event::new(EventKind::ContextResuming));
        let ids = std::mem::take(&mut *self.suspended.lock());
        let resumed = self.parts().registry.resume_all(&ids).await;
        self.state.set(ContextStatus::Started);
        if resumed.is_ok() {
            tracing::info!(context = %self.cfg.name, workflows = ids.len(), "context resumed");
            self.bus.publish(Event::new(EventKind::ContextResumed));
        }
        resumed
    }

    /// Starts the context, waits for a termination signal, then stops it.
    pub async fn run_until_signal(&self) -> Result<(), ContextError> {
        self.start().await?;
        if let Err(err) = wait_for_shutdown_signal().await {
            tracing::warn!(error = %err, "failed to install signal handlers; stopping");
        }
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.stop().await
    }

    // ---- workflows ----------------------------------------------------------

    /// Adds a workflow. Before init it is kept pending; afterwards it is registered
    /// and, when the context runs and the workflow auto-starts, started.
    pub async fn add_workflow(&self, workflow: Workflow) -> Result<(), ContextError> {
        if !self.initialized.load(Ordering::Acquire) {
            let mut pending = self.pending.lock();
            if pending.iter().any(|w| w.id() == workflow.id()) {
                return Err(ContextError::DuplicateWorkflow {
                    id: Arc::clone(workflow.id()),
                });
            }
            pending.push(workflow);
            return Ok(());
        }

        let auto = workflow.auto_startup();
        let service = self.register(workflow)?;
        let registry = &self.parts().registry;
        if auto && registry.is_started() {
            registry.start_workflow(service.id()).await?;
        }
        Ok(())
    }

    pub async fn start_workflow(&self, id: &str) -> Result<(), ContextError> {
        self.initialized_registry("start workflow")?.start_workflow(id).await
    }

    /// Returns `Ok(false)` when the stop timed out and was aborted.
    pub async fn stop_workflow(
        &self,
        id: &str,
        timeout: Option<Duration>,
        abort_after_timeout: bool,
    ) -> Result<bool, ContextError> {
        self.initialized_registry("stop workflow")?
            .stop_workflow(id, timeout, abort_after_timeout)
            .await
    }

    pub async fn suspend_workflow(&self, id: &str, timeout: Option<Duration>) -> Result<(), ContextError> {
        self.initialized_registry("suspend workflow")?
            .suspend_workflow(id, timeout)
            .await
    }

    pub async fn resume_workflow(&self, id: &str) -> Result<(), ContextError> {
        self.initialized_registry("resume workflow")?.resume_workflow(id).await
    }

    pub async fn remove_workflow(&self, id: &str) -> Result<(), ContextError> {
        self.initialized_registry("remove workflow")?.remove_workflow(id).await
    }

    fn initialized_registry(&self, op: &'static str) -> Result<&Arc<WorkflowRegistry>, ContextError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(ContextError::InvalidState {
                op,
                status: self.state.status(),
            });
        }
        Ok(&self.parts().registry)
    }

    // ---- queries ------------------------------------------------------------

    pub fn config(&self) -> &ContextConfig {
        &self.cfg
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn status(&self) -> ContextStatus {
        self.state.status()
    }

    pub fn state(&self) -> &Arc<ContextState> {
        &self.state
    }

    /// Subscribes to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Number of event subscribers attached at build time.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    pub fn inflight(&self) -> &Arc<InflightTracker> {
        &self.inflight
    }

    /// Whether a forced shutdown is rejecting new exchanges.
    pub fn is_forced_shutdown(&self) -> bool {
        self.flag.is_forced()
    }

    /// Whether the last stop or suspend hit its timeout.
    pub fn shutdown_timed_out(&self) -> bool {
        self.parts
            .get()
            .is_some_and(|p| p.coordinator.timeout_occurred())
    }

    pub fn workflow(&self, id: &str) -> Option<Arc<WorkflowService>> {
        self.parts.get().and_then(|p| p.registry.get(id))
    }

    pub fn workflow_status(&self, id: &str) -> Option<ServiceStatus> {
        self.parts.get().and_then(|p| p.registry.status(id))
    }

    /// Registered workflow ids (pending ones included), sorted.
    pub fn workflow_ids(&self) -> Vec<Arc<str>> {
        let mut ids = self.parts.get().map(|p| p.registry.ids()).unwrap_or_default();
        ids.extend(self.pending.lock().iter().map(|w| Arc::clone(w.id())));
        ids.sort_unstable();
        ids
    }

    pub fn workflow_error(&self, id: &str) -> Option<WorkflowError> {
        self.parts.get().and_then(|p| p.registry.error(id))
    }

    pub fn startup_orders(&self) -> Vec<WorkflowStartupOrder> {
        self.parts
            .get()
            .map(|p| p.registry.startup_orders())
            .unwrap_or_default()
    }

    /// Started endpoint URIs.
    pub fn endpoint_uris(&self) -> Vec<String> {
        self.parts.get().map(|p| p.endpoints.uris()).unwrap_or_default()
    }

    /// The supervising controller, once init created it.
    #[cfg(feature = "supervising")]
    pub fn supervising(&self) -> Option<&Arc<SupervisingController>> {
        self.controller.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContextBuilder, ShutdownConfig};
    use crate::error::ProcessError;
    use crate::testing::{Gate, Journal, RecordingAdvice, TestResolver, noop, test_workflow};
    use serde_json::json;

    struct Veto {
        rethrow: bool,
    }

    impl StartupHook for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        fn on_init(&self, _ctx: &Context) -> Result<(), VetoStartup> {
            let veto = VetoStartup::new("maintenance window");
            Err(if self.rethrow { veto.rethrow() } else { veto })
        }
    }

    fn config(timeout: Duration) -> ContextConfig {
        ContextConfig {
            shutdown: ShutdownConfig {
                timeout,
                ..ShutdownConfig::default()
            },
            ..ContextConfig::default()
        }
    }

    fn context(cfg: ContextConfig, journal: &Journal) -> (Arc<Context>, Arc<TestResolver>) {
        let resolver = TestResolver::new(journal);
        let ctx = ContextBuilder::new(cfg)
            .with_resolver(resolver.clone())
            .build();
        (ctx, resolver)
    }

    #[tokio::test]
    async fn test_lifecycle_is_phase_guarded() {
        let journal = Journal::default();
        let (ctx, _) = context(config(Duration::from_secs(5)), &journal);
        ctx.add_workflow(test_workflow("a").build(noop())).await.unwrap();

        ctx.stop().await.unwrap();
        assert_eq!(ctx.status(), ContextStatus::Created);

        ctx.start().await.unwrap();
        ctx.start().await.unwrap();
        assert_eq!(ctx.status(), ContextStatus::Started);
        assert_eq!(journal.count("start:a"), 1);

        ctx.stop().await.unwrap();
        ctx.stop().await.unwrap();
        assert_eq!(ctx.status(), ContextStatus::Stopped);
        assert_eq!(journal.count("stop:a"), 1);
        assert_eq!(ctx.workflow_status("a"), Some(ServiceStatus::Stopped));
        assert!(journal.contains("endpoint-stop:a"));
    }

    #[tokio::test]
    async fn test_swallowed_veto_leaves_context_failed() {
        let journal = Journal::default();
        let resolver = TestResolver::new(&journal);
        let ctx = ContextBuilder::new(ContextConfig::default())
            .with_resolver(resolver)
            .with_hook(Arc::new(Veto { rethrow: false }))
            .with_workflow(test_workflow("a").build(noop()))
            .build();

        ctx.start().await.unwrap();
        assert_eq!(ctx.status(), ContextStatus::Failed);
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_rethrown_veto_fails_start() {
        let ctx = ContextBuilder::new(ContextConfig::default())
            .with_hook(Arc::new(Veto { rethrow: true }))
            .build();

        let err = ctx.start().await.unwrap_err();
        assert!(matches!(err, ContextError::Vetoed { .. }));
        assert_eq!(ctx.status(), ContextStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_stuck_exchange_forces_and_rejects_new_exchanges() {
        let journal = Journal::default();
        let (ctx, resolver) = context(config(Duration::from_secs(1)), &journal);
        let gate = Gate::new();
        ctx.add_workflow(
            test_workflow("stuck")
                .advice(Arc::new(RecordingAdvice::new("user", 0, &journal)))
                .build(gate.processor()),
        )
        .await
        .unwrap();
        ctx.start().await.unwrap();

        let consumer = resolver.consumer("stuck").unwrap();
        let held = Arc::clone(&consumer);
        tokio::spawn(async move { held.send(json!("never finishes")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.inflight().size_of("stuck"), 1);

        let started = tokio::time::Instant::now();
        ctx.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(ctx.shutdown_timed_out());
        assert!(ctx.is_forced_shutdown());
        assert_eq!(ctx.status(), ContextStatus::Stopped);

        journal.clear();
        let ex = consumer.send(json!("late")).await.unwrap();
        assert!(ex.error().is_some_and(ProcessError::is_rejection));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_stop_starts_workflows_again() {
        let journal = Journal::default();
        let (ctx, _) = context(config(Duration::from_secs(5)), &journal);
        ctx.add_workflow(test_workflow("a").build(noop())).await.unwrap();

        ctx.start().await.unwrap();
        ctx.stop().await.unwrap();
        ctx.start().await.unwrap();

        assert_eq!(journal.count("start:a"), 2);
        assert_eq!(journal.count("endpoint-start:a"), 2);
        assert_eq!(ctx.workflow_status("a"), Some(ServiceStatus::Started));
        assert!(!ctx.is_forced_shutdown());
    }

    #[tokio::test]
    async fn test_restart_honors_disabled_auto_startup() {
        let journal = Journal::default();
        let cfg = ContextConfig {
            auto_startup: false,
            ..config(Duration::from_secs(5))
        };
        let (ctx, _) = context(cfg, &journal);
        ctx.add_workflow(test_workflow("a").build(noop())).await.unwrap();

        ctx.start().await.unwrap();
        assert_eq!(journal.count("start:a"), 1);
        ctx.stop().await.unwrap();
        ctx.start().await.unwrap();

        assert_eq!(journal.count("start:a"), 1);
        assert_eq!(ctx.workflow_status("a"), Some(ServiceStatus::Stopped));
        ctx.start_workflow("a").await.unwrap();
        assert_eq!(ctx.workflow_status("a"), Some(ServiceStatus::Started));
    }

    #[tokio::test]
    async fn test_failed_start_releases_and_can_retry() {
        let journal = Journal::default();
        let (ctx, resolver) = context(config(Duration::from_secs(5)), &journal);
        ctx.add_workflow(test_workflow("ok").startup_order(1).build(noop()))
            .await
            .unwrap();
        ctx.add_workflow(test_workflow("bad").startup_order(2).build(noop()))
            .await
            .unwrap();
        resolver.knobs("bad").fail_starts(1);

        let err = ctx.start().await.unwrap_err();
        assert_eq!(err.as_label(), "workflow_start_failed");
        assert_eq!(ctx.status(), ContextStatus::Failed);
        assert_eq!(ctx.workflow_status("ok"), Some(ServiceStatus::Stopped));
        assert!(ctx.endpoint_uris().is_empty());
        assert!(ctx.workflow_error("bad").is_some());

        ctx.start().await.unwrap();
        assert_eq!(ctx.status(), ContextStatus::Started);
        assert_eq!(ctx.workflow_status("bad"), Some(ServiceStatus::Started));
    }

    #[tokio::test]
    async fn test_suspend_and_resume_restore_started_subset() {
        let journal = Journal::default();
        let (ctx, resolver) = context(config(Duration::from_secs(5)), &journal);
        resolver.knobs("live").set_suspendable(true);
        ctx.add_workflow(test_workflow("live").build(noop())).await.unwrap();
        ctx.add_workflow(test_workflow("manual").auto_startup(false).build(noop()))
            .await
            .unwrap();
        ctx.start().await.unwrap();

        ctx.suspend().await.unwrap();
        assert_eq!(ctx.status(), ContextStatus::Suspended);
        assert_eq!(ctx.workflow_status("live"), Some(ServiceStatus::Suspended));

        ctx.resume().await.unwrap();
        assert_eq!(ctx.status(), ContextStatus::Started);
        assert_eq!(ctx.workflow_status("live"), Some(ServiceStatus::Started));
        assert_eq!(ctx.workflow_status("manual"), Some(ServiceStatus::Initialized));
    }

    #[tokio::test]
    async fn test_resume_keeps_manually_stopped_workflow_stopped() {
        let journal = Journal::default();
        let (ctx, resolver) = context(config(Duration::from_secs(5)), &journal);
        resolver.knobs("kept").set_suspendable(true);
        ctx.add_workflow(test_workflow("kept").build(noop())).await.unwrap();
        ctx.add_workflow(test_workflow("halted").build(noop())).await.unwrap();
        ctx.start().await.unwrap();
        assert_eq!(ctx.workflow_status("halted"), Some(ServiceStatus::Started));

        assert!(ctx.stop_workflow("halted", None, false).await.unwrap());
        assert_eq!(ctx.workflow_status("halted"), Some(ServiceStatus::Stopped));

        ctx.suspend().await.unwrap();
        ctx.resume().await.unwrap();

        assert_eq!(ctx.status(), ContextStatus::Started);
        assert_eq!(ctx.workflow_status("kept"), Some(ServiceStatus::Started));
        assert_eq!(ctx.workflow_status("halted"), Some(ServiceStatus::Stopped));
        assert_eq!(journal.count("start:halted"), 1);
        assert_eq!(journal.count("resume:kept"), 1);
    }

    #[tokio::test]
    async fn test_workflow_added_after_start_is_started() {
        let journal = Journal::default();
        let (ctx, _) = context(config(Duration::from_secs(5)), &journal);
        ctx.start().await.unwrap();

        ctx.add_workflow(test_workflow("late").build(noop())).await.unwrap();
        assert_eq!(ctx.workflow_status("late"), Some(ServiceStatus::Started));

        let err = ctx
            .add_workflow(test_workflow("late").build(noop()))
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::DuplicateWorkflow { .. }));
    }

    #[tokio::test]
    async fn test_workflow_ops_require_init() {
        let ctx = ContextBuilder::new(ContextConfig::default()).build();
        let err = ctx.start_workflow("x").await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidState { op: "start workflow", .. }));
    }
}
