//! # Supervising controller: backoff restarts of failing workflows.
//!
//! The controller takes over workflow startup when the context starts. It splits
//! the auto-startup workflows with a [`WorkflowFilter`] and owns the supervised
//! ones: manual operations on them are routed through it, and a failed start is
//! handed to a [`BackoffScheduler`] instead of failing the context.
//!
//! ```text
//! start_workflows()
//!   ├─► non-supervised: registry.start_many(..)         ── error → context start fails
//!   └─► supervised (after initial_delay):
//!         registry.start_with(id) ── error → record, RestartFailed(0)
//!                                      └─► scheduler.schedule(id, backoff, retry)
//!
//! retry(state)
//!   ├─ context no longer runnable → Ok (silently)
//!   └─ WorkflowRestarting → registry.start_guarded(id, token)
//!        ├─ cancelled while queued on the lock → Ok (dropped)
//!        ├─ Ok  → Completed; error cleared
//!        └─ Err → RestartFailed(n); next delay or Exhausted
//!
//! Exhausted → exhausted set, controller detached, RestartExhausted, mark_unhealthy
//! ```
//!
//! ## Rules
//! - Manual start/stop/suspend/resume cancels the pending backoff for that id before delegating;
//!   a retry already queued on the registry lock is dropped once it gets the lock.
//! - A failing manual start re-enters backoff and still returns its error.
//! - The controller is unhealthy until the first pass over supervised workflows completes.
//! - Exhausted workflows are no longer supervised until the context starts again.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::config::SupervisingConfig;
use super::health::HealthSink;
use super::pattern::WorkflowFilter;
use crate::backoff::{BackoffScheduler, BackoffState, BackoffStatus};
use crate::core::{ContextState, Op, PoolProfile, WorkflowRegistry};
use crate::error::{ContextError, SupervisionError};
use crate::events::{Bus, Event, EventKind};
use crate::executor::{ExecutorProvider, ManagedPool};
use crate::workflow::{WorkflowController, WorkflowService};

/// Restarts supervised workflows with backoff and tracks their health.
pub struct SupervisingController {
    cfg: SupervisingConfig,
    filter: WorkflowFilter,
    registry: Arc<WorkflowRegistry>,
    state: Arc<ContextState>,
    scheduler: BackoffScheduler,
    bus: Bus,
    health: Option<Arc<dyn HealthSink>>,

    errors: DashMap<Arc<str>, Arc<str>>,
    exhausted: Mutex<BTreeSet<Arc<str>>>,
    bootstrapped: AtomicBool,
    delayed: Mutex<CancellationToken>,
    me: Weak<Self>,
}

impl SupervisingController {
    pub fn new(
        cfg: SupervisingConfig,
        registry: Arc<WorkflowRegistry>,
        state: Arc<ContextState>,
        executors: Arc<dyn ExecutorProvider>,
        bus: Bus,
        health: Option<Arc<dyn HealthSink>>,
    ) -> Result<Arc<Self>, ContextError> {
        let filter = WorkflowFilter::new(&cfg.include, &cfg.exclude)?;
        let pool = ManagedPool::new(
            executors,
            "supervising",
            PoolProfile::fixed(cfg.thread_pool_size),
        );
        let scheduler = BackoffScheduler::new(pool, bus.clone());

        Ok(Arc::new_cyclic(|me| Self {
            cfg,
            filter,
            registry,
            state,
            scheduler,
            bus,
            health,
            errors: DashMap::new(),
            exhausted: Mutex::new(BTreeSet::new()),
            bootstrapped: AtomicBool::new(false),
            delayed: Mutex::new(CancellationToken::new()),
            me: me.clone(),
        }))
    }

    pub fn config(&self) -> &SupervisingConfig {
        &self.cfg
    }

    /// Returns `true` when `id` is selected by the include/exclude patterns.
    pub fn supervises(&self, id: &str) -> bool {
        self.filter.matches(id)
    }

    /// Takes ownership of `service` when its id is supervised.
    pub fn attach(&self, service: &WorkflowService) {
        if !self.supervises(service.id()) {
            return;
        }
        let me: Weak<dyn WorkflowController> = self.me.clone();
        service.workflow().attach_controller(me);
    }

    /// Starts auto-startup workflows: non-supervised ones first, then supervised ones.
    ///
    /// Only non-supervised failures are returned.
    pub async fn start_workflows(&self) -> Result<(), ContextError> {
        self.bootstrapped.store(false, Ordering::Release);
        self.exhausted.lock().clear();
        self.errors.clear();

        let mut plain = Vec::new();
        let mut supervised = Vec::new();
        for service in self.registry.services() {
            if !service.workflow().auto_startup() {
                continue;
            }
            if self.supervises(service.id()) {
                self.attach(&service);
                supervised.push(service);
            } else {
                plain.push(Arc::clone(service.id()));
            }
        }
        supervised.sort_by_key(|s| {
            let order = s.workflow().startup_order();
            (order.is_none(), order)
        });
        let supervised: Vec<Arc<str>> = supervised.iter().map(|s| Arc::clone(s.id())).collect();

        tracing::debug!(
            plain = plain.len(),
            supervised = supervised.len(),
            "supervising controller starting workflows"
        );
        self.registry.start_many(&plain, Op::Bootstrap).await?;

        if self.cfg.initial_delay.is_zero() {
            self.start_supervised(&supervised).await;
            return Ok(());
        }
        self.start_delayed(supervised, self.cfg.initial_delay);
        Ok(())
    }

    fn start_delayed(&self, ids: Vec<Arc<str>>, delay: Duration) {
        let token = {
            let mut delayed = self.delayed.lock();
            delayed.cancel();
            *delayed = CancellationToken::new();
            delayed.clone()
        };
        let me = self.me.clone();
        tracing::info!(delay_ms = delay.as_millis() as u64, "supervised workflows start after initial delay");
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(me) = me.upgrade() {
                        if me.state.is_run_allowed() {
                            me.start_supervised(&ids).await;
                        }
                    }
                }
            }
        });
    }

    async fn start_supervised(&self, ids: &[Arc<str>]) {
        for id in ids {
            if let Err(err) = self.registry.start_with(id, Op::Controller).await {
                self.start_failed(id, &err, 0);
            }
        }
        self.bootstrapped.store(true, Ordering::Release);
    }

    fn start_failed(&self, id: &Arc<str>, err: &ContextError, attempt: u32) {
        let reason: Arc<str> = err.to_string().into();
        tracing::warn!(workflow = %id, attempt, %reason, "supervised workflow failed to start");
        self.errors.insert(Arc::clone(id), Arc::clone(&reason));
        self.bus.publish(
            Event::new(EventKind::WorkflowRestartFailed)
                .with_workflow(Arc::clone(id))
                .with_attempt(attempt)
                .with_reason(Arc::clone(&reason)),
        );
        if attempt == 0 {
            self.schedule(id, reason);
        } else {
            self.mark_restarting(id, reason);
        }
    }

    fn mark_restarting(&self, id: &Arc<str>, last_error: Arc<str>) {
        if !self.cfg.unhealthy_on_restarting {
            return;
        }
        if let Some(health) = &self.health {
            health.mark_unhealthy(
                id,
                &SupervisionError::Restarting {
                    id: Arc::clone(id),
                    last_error,
                },
            );
        }
    }

    fn schedule(&self, id: &Arc<str>, reason: Arc<str>) {
        if self.scheduler.get(id).is_some() {
            return;
        }
        self.mark_restarting(id, reason);

        let me = self.me.clone();
        let scheduled = self
            .scheduler
            .schedule(Arc::clone(id), self.cfg.backoff, move |state, token| {
                let me = me.clone();
                async move {
                    match me.upgrade() {
                        Some(me) => me.retry(state, token).await,
                        None => Ok(()),
                    }
                }
            });
        match scheduled {
            Ok(task) => {
                let me = self.me.clone();
                task.when_complete(move |state| {
                    if let Some(me) = me.upgrade() {
                        me.finished(state);
                    }
                });
            }
            Err(err) => {
                tracing::error!(workflow = %id, error = %err, "cannot schedule workflow restart");
            }
        }
    }

    async fn retry(&self, state: BackoffState, token: CancellationToken) -> Result<(), ContextError> {
        if token.is_cancelled() || !self.state.is_run_allowed() {
            tracing::debug!(workflow = %state.key, "context not runnable; restart skipped");
            return Ok(());
        }
        tracing::info!(workflow = %state.key, attempt = state.attempts, "restarting workflow");
        self.bus.publish(
            Event::new(EventKind::WorkflowRestarting)
                .with_workflow(Arc::clone(&state.key))
                .with_attempt(state.attempts),
        );
        match self.registry.start_guarded(&state.key, &token).await {
            Ok(()) => Ok(()),
            Err(ContextError::UnknownWorkflow { .. }) => {
                tracing::debug!(workflow = %state.key, "workflow removed; restart dropped");
                Ok(())
            }
            Err(err) => {
                self.start_failed(&state.key, &err, state.attempts);
                Err(err)
            }
        }
    }

    fn finished(&self, state: &BackoffState) {
        match state.status {
            BackoffStatus::Completed => {
                self.errors.remove(&state.key);
                if let Some(health) = &self.health {
                    health.mark_healthy(&state.key);
                }
            }
            BackoffStatus::Exhausted => {
                if !self.exhausted.lock().insert(Arc::clone(&state.key)) {
                    return;
                }
                if let Some(service) = self.registry.get(&state.key) {
                    service.workflow().detach_controller();
                }
                let last_error = self
                    .errors
                    .get(&state.key)
                    .map(|e| Arc::clone(e.value()))
                    .or_else(|| state.last_error.clone());
                tracing::error!(
                    workflow = %state.key,
                    attempts = state.attempts,
                    "workflow restart attempts exhausted"
                );
                let mut event = Event::new(EventKind::WorkflowRestartExhausted)
                    .with_workflow(Arc::clone(&state.key))
                    .with_attempt(state.attempts);
                if let Some(reason) = &last_error {
                    event = event.with_reason(Arc::clone(reason));
                }
                self.bus.publish(event);

                if self.cfg.unhealthy_on_exhausted {
                    if let Some(health) = &self.health {
                        health.mark_unhealthy(
                            &state.key,
                            &SupervisionError::RetryExhausted {
                                id: Arc::clone(&state.key),
                                attempts: state.attempts,
                                elapsed: state.elapsed,
                                last_error,
                            },
                        );
                    }
                }
            }
            BackoffStatus::Active | BackoffStatus::Cancelled => {}
        }
    }

    /// Cancels pending restarts and the delayed first start.
    pub fn stop(&self) {
        self.delayed.lock().cancel();
        self.scheduler.cancel_all();
    }

    /// Workflows waiting for a restart, sorted.
    pub fn restarting(&self) -> Vec<Arc<str>> {
        self.scheduler.keys()
    }

    /// Workflows whose restart budget is used up, sorted.
    pub fn exhausted(&self) -> Vec<Arc<str>> {
        self.exhausted.lock().iter().cloned().collect()
    }

    /// Last start failure of a supervised workflow.
    pub fn restart_error(&self, id: &str) -> Option<Arc<str>> {
        self.errors.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn backoff_state(&self, id: &str) -> Option<BackoffState> {
        self.scheduler.get(id).map(|t| t.state())
    }

    pub fn is_healthy(&self) -> bool {
        if !self.bootstrapped.load(Ordering::Acquire) {
            return false;
        }
        if self.cfg.unhealthy_on_restarting && !self.scheduler.is_empty() {
            return false;
        }
        !(self.cfg.unhealthy_on_exhausted && !self.exhausted.lock().is_empty())
    }
}

#[async_trait]
impl WorkflowController for SupervisingController {
    fn name(&self) -> &str {
        "supervising"
    }

    async fn start_workflow(&self, id: &str) -> Result<(), ContextError> {
        self.scheduler.cancel(id);
        match self.registry.start_with(id, Op::Controller).await {
            Ok(()) => {
                self.errors.remove(id);
                Ok(())
            }
            Err(err @ ContextError::UnknownWorkflow { .. }) => Err(err),
            Err(err) => {
                self.start_failed(&Arc::from(id), &err, 0);
                Err(err)
            }
        }
    }

    async fn stop_workflow(
        &self,
        id: &str,
        timeout: Option<Duration>,
        abort_after_timeout: bool,
    ) -> Result<bool, ContextError> {
        self.scheduler.cancel(id);
        self.registry
            .stop_with(id, timeout, abort_after_timeout, Op::Controller)
            .await
    }

    async fn suspend_workflow(&self, id: &str, timeout: Option<Duration>) -> Result<(), ContextError> {
        self.scheduler.cancel(id);
        self.registry.suspend_with(id, timeout, Op::Controller).await
    }

    async fn resume_workflow(&self, id: &str) -> Result<(), ContextError> {
        self.scheduler.cancel(id);
        self.registry.resume_with(id, Op::Controller).await
    }
}

impl std::fmt::Debug for SupervisingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisingController")
            .field("restarting", &self.restarting())
            .field("exhausted", &self.exhausted())
            .finish_non_exhaustive()
    }
}
