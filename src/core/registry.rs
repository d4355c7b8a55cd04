//! # Workflow registry: the authoritative set of workflow services.
//!
//! [`WorkflowRegistry`] owns one [`WorkflowService`] per registered workflow and
//! performs every lifecycle transition under a single async mutation lock.
//! Stopping and suspending go through the [`ShutdownCoordinator`].
//!
//! ## Architecture
//! ```text
//! start_workflow(id) ─┬─ controller attached? ──► controller.start_workflow(id)
//!                     │                               └─► start_with(id, Op::Controller)
//!                     └─ start_with(id, Op::Manual)
//!                           lock ─► Suspended? resume : assign rank → warm up → start consumer
//!
//! stop_workflow(id) ──► lock ─► coordinator.shutdown_one(order)
//!                                  ├─ Aborted → restore consumer, Ok(false)
//!                                  └─ else    → stop services, Ok(true)
//! ```
//!
//! ## Rules
//! - Ids are unique; one service per workflow.
//! - Ranks are assigned once, at first start: explicit orders as given (must be unique),
//!   others from 1000 upward in registration order.
//! - Start failures are recorded per workflow before they are returned.
//! - `remove_workflow` requires a stopped workflow and frees endpoints no other workflow uses.
//! - Manual operations on a workflow owned by a controller are routed through it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::config::PipelineConfig;
use super::inflight::InflightTracker;
use super::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use crate::error::{ContextError, ServiceError, WorkflowError, WorkflowPhase};
use crate::events::{Bus, Event, EventKind};
use crate::pipeline::{
    AdvicePipeline, AdviceRef, InflightAdvice, MessageHistoryAdvice, TracingAdvice,
    UnitOfWorkAdvice, WorkflowPolicyAdvice,
};
use crate::workflow::{
    EndpointRegistry, ServiceStatus, Workflow, WorkflowController, WorkflowService,
    WorkflowStartupOrder,
};

/// First rank handed to workflows without an explicit startup order.
const FIRST_AUTO_RANK: i32 = 1000;

/// Origin of a lifecycle request, passed down the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Called by user code; routed through an attached controller.
    Manual,
    /// Part of the context start pass.
    Bootstrap,
    /// Issued by a workflow controller on behalf of the workflow.
    Controller,
}

/// Registry of workflow services.
pub struct WorkflowRegistry {
    services: RwLock<HashMap<Arc<str>, Arc<WorkflowService>>>,
    lock: tokio::sync::Mutex<()>,
    coordinator: Arc<ShutdownCoordinator>,
    endpoints: Arc<EndpointRegistry>,
    inflight: Arc<InflightTracker>,
    pipeline: PipelineConfig,
    bus: Bus,
    errors: DashMap<Arc<str>, WorkflowError>,
    started: AtomicBool,
    bootstrapping: AtomicBool,
    next_rank: AtomicI32,
    seq: AtomicU64,
}

impl WorkflowRegistry {
    pub(crate) fn new(
        coordinator: Arc<ShutdownCoordinator>,
        endpoints: Arc<EndpointRegistry>,
        inflight: Arc<InflightTracker>,
        pipeline: PipelineConfig,
        bus: Bus,
    ) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            lock: tokio::sync::Mutex::new(()),
            coordinator,
            endpoints,
            inflight,
            pipeline,
            bus,
            errors: DashMap::new(),
            started: AtomicBool::new(false),
            bootstrapping: AtomicBool::new(false),
            next_rank: AtomicI32::new(FIRST_AUTO_RANK),
            seq: AtomicU64::new(0),
        }
    }

    // ---- registration -------------------------------------------------------

    /// Registers `workflow` and builds its advice pipeline. Does not start it.
    pub(crate) fn register(&self, workflow: Workflow) -> Result<Arc<WorkflowService>, ContextError> {
        let workflow = Arc::new(workflow);
        let id = Arc::clone(workflow.id());

        let mut services = self.services.write();
        if services.contains_key(&id) {
            return Err(ContextError::DuplicateWorkflow { id });
        }
        let pipeline = Arc::new(AdvicePipeline::new(
            Arc::clone(&id),
            Arc::clone(workflow.processor()),
            self.advices_for(&workflow),
            &self.pipeline,
            self.coordinator.flag().clone(),
        ));
        let service = Arc::new(WorkflowService::new(
            workflow,
            pipeline,
            self.seq.fetch_add(1, Ordering::Relaxed),
        ));
        services.insert(Arc::clone(&id), Arc::clone(&service));
        drop(services);

        tracing::debug!(workflow = %id, "workflow registered");
        self.bus.publish(Event::new(EventKind::WorkflowAdded).with_workflow(id));
        Ok(service)
    }

    fn advices_for(&self, workflow: &Workflow) -> Vec<AdviceRef> {
        let id = workflow.id();
        let mut advices: Vec<AdviceRef> = vec![
            Arc::new(UnitOfWorkAdvice::new(Arc::clone(id))),
            Arc::new(InflightAdvice::new(Arc::clone(&self.inflight), Arc::clone(id))),
        ];
        if !workflow.policies().is_empty() {
            advices.push(Arc::new(WorkflowPolicyAdvice::new(
                Arc::clone(id),
                workflow.policies().to_vec(),
            )));
        }
        if self.pipeline.message_history {
            advices.push(Arc::new(MessageHistoryAdvice::new(
                Arc::clone(id),
                workflow.from_uri(),
            )));
        }
        if self.pipeline.tracing {
            advices.push(Arc::new(TracingAdvice::new(Arc::clone(id))));
        }
        advices.extend(workflow.advices().iter().cloned());
        advices
    }

    // ---- registry state -----------------------------------------------------

    pub(crate) fn begin_bootstrap(&self) {
        self.bootstrapping.store(true, Ordering::Release);
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
        self.bootstrapping.store(false, Ordering::Release);
    }

    pub(crate) fn mark_stopped(&self) {
        self.started.store(false, Ordering::Release);
        self.bootstrapping.store(false, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::Acquire)
    }

    fn runnable(&self, op: Op) -> bool {
        self.is_started() || (op != Op::Manual && self.is_bootstrapping())
    }

    // ---- queries ------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowService>> {
        self.services.read().get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<ServiceStatus> {
        self.get(id).map(|s| s.status())
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<Arc<str>> {
        let mut ids: Vec<Arc<str>> = self.services.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Registered services in registration order.
    pub fn services(&self) -> Vec<Arc<WorkflowService>> {
        let mut services: Vec<_> = self.services.read().values().cloned().collect();
        services.sort_by_key(|s| s.seq());
        services
    }

    /// Last recorded failure of `id`.
    pub fn error(&self, id: &str) -> Option<WorkflowError> {
        self.errors.get(id).map(|e| e.value().clone())
    }

    /// Ranked workflows, ascending.
    pub fn startup_orders(&self) -> Vec<WorkflowStartupOrder> {
        let mut orders: Vec<_> = self
            .services
            .read()
            .values()
            .filter_map(WorkflowService::startup_order)
            .collect();
        orders.sort();
        orders
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    fn require(&self, id: &str) -> Result<Arc<WorkflowService>, ContextError> {
        self.get(id)
            .ok_or_else(|| ContextError::UnknownWorkflow { id: id.into() })
    }

    fn controller_of(&self, id: &str, op: Op) -> Option<Arc<dyn WorkflowController>> {
        if op != Op::Manual {
            return None;
        }
        self.get(id).and_then(|s| s.workflow().controller())
    }

    fn record(&self, id: &Arc<str>, phase: WorkflowPhase, cause: ServiceError) -> ContextError {
        let err = WorkflowError::new(Arc::clone(id), phase, cause);
        self.errors.insert(Arc::clone(id), err.clone());
        ContextError::Workflow(err)
    }

    // ---- single-workflow operations -----------------------------------------

    /// Starts (or resumes) one workflow.
    pub async fn start_workflow(&self, id: &str) -> Result<(), ContextError> {
        self.start_with(id, Op::Manual).await
    }

    pub(crate) async fn start_with(&self, id: &str, op: Op) -> Result<(), ContextError> {
        if let Some(controller) = self.controller_of(id, op) {
            return controller.start_workflow(id).await;
        }
        let _guard = self.lock.lock().await;
        let service = self.require(id)?;
        if !self.runnable(op) {
            tracing::debug!(workflow = %id, "context not started; workflow starts with it");
            return Ok(());
        }
        self.start_locked(&service).await
    }

    /// Controller start that is dropped when `guard` is cancelled before the lock is taken.
    pub(crate) async fn start_guarded(&self, id: &str, guard: &CancellationToken) -> Result<(), ContextError> {
        let _guard = self.lock.lock().await;
        if guard.is_cancelled() {
            tracing::debug!(workflow = %id, "start request cancelled while queued");
            return Ok(());
        }
        let service = self.require(id)?;
        if !self.runnable(Op::Controller) {
            return Ok(());
        }
        self.start_locked(&service).await
    }

    /// Gracefully stops one workflow.
    ///
    /// Returns `Ok(false)` when the stop timed out and was aborted; the workflow
    /// is then running exactly as before the call.
    pub async fn stop_workflow(
        &self,
        id: &str,
        timeout: Option<Duration>,
        abort_after_timeout: bool,
    ) -> Result<bool, ContextError> {
        self.stop_with(id, timeout, abort_after_timeout, Op::Manual).await
    }

    pub(crate) async fn stop_with(
        &self,
        id: &str,
        timeout: Option<Duration>,
        abort_after_timeout: bool,
        op: Op,
    ) -> Result<bool, ContextError> {
        if let Some(controller) = self.controller_of(id, op) {
            return controller
                .stop_workflow(id, timeout, abort_after_timeout)
                .await;
        }
        let _guard = self.lock.lock().await;
        let service = self.require(id)?;
        self.stop_locked(&service, timeout, abort_after_timeout).await
    }

    /// Suspends one workflow; degrades to a stop when its consumer cannot suspend.
    pub async fn suspend_workflow(&self, id: &str, timeout: Option<Duration>) -> Result<(), ContextError> {
        self.suspend_with(id, timeout, Op::Manual).await
    }

    pub(crate) async fn suspend_with(
        &self,
        id: &str,
        timeout: Option<Duration>,
        op: Op,
    ) -> Result<(), ContextError> {
        if let Some(controller) = self.controller_of(id, op) {
            return controller.suspend_workflow(id, timeout).await;
        }
        let _guard = self.lock.lock().await;
        let service = self.require(id)?;
        if service.status() != ServiceStatus::Started {
            tracing::debug!(workflow = %id, status = %service.status(), "suspend ignored; workflow not started");
            return Ok(());
        }
        if !service.can_suspend() {
            tracing::debug!(workflow = %id, "consumer cannot suspend; stopping instead");
            return self.stop_locked(&service, timeout, false).await.map(|_| ());
        }
        let Some(order) = service.startup_order() else {
            return Ok(());
        };
        let timeout = timeout.unwrap_or(self.coordinator.config().timeout);
        self.coordinator.suspend(std::slice::from_ref(&order), timeout).await?;
        if service.status().is_suspended() {
            self.bus
                .publish(Event::new(EventKind::WorkflowSuspended).with_workflow(Arc::clone(service.id())));
        }
        Ok(())
    }

    /// Resumes a suspended workflow; a workflow whose suspension degraded to a stop is started.
    pub async fn resume_workflow(&self, id: &str) -> Result<(), ContextError> {
        self.resume_with(id, Op::Manual).await
    }

    pub(crate) async fn resume_with(&self, id: &str, op: Op) -> Result<(), ContextError> {
        if let Some(controller) = self.controller_of(id, op) {
            return controller.resume_workflow(id).await;
        }
        let _guard = self.lock.lock().await;
        let service = self.require(id)?;
        self.resume_locked(&service).await
    }

    /// Removes a stopped workflow and frees endpoints no remaining workflow uses.
    pub async fn remove_workflow(&self, id: &str) -> Result<(), ContextError> {
        let _guard = self.lock.lock().await;
        let service = self.require(id)?;
        let status = service.status();
        if !status.is_stopped() {
            return Err(ContextError::NotStopped {
                id: Arc::clone(service.id()),
                status,
            });
        }

        service.set_status(ServiceStatus::Shutdown);
        service.pipeline().clear_pool();
        service.workflow().detach_controller();
        self.services.write().remove(id);
        self.errors.remove(id);

        let remaining = self.services();
        for uri in service.workflow().endpoint_uris() {
            let shared = remaining
                .iter()
                .any(|other| other.workflow().endpoint_uris().any(|u| u == uri));
            if !shared {
                self.endpoints.release(uri).await;
            }
        }

        tracing::info!(workflow = %id, "workflow removed");
        self.bus
            .publish(Event::new(EventKind::WorkflowRemoved).with_workflow(Arc::clone(service.id())));
        Ok(())
    }

    // ---- bulk operations ----------------------------------------------------

    /// Starts every auto-startup workflow in ascending rank.
    pub(crate) async fn start_all(&self) -> Result<(), ContextError> {
        let ids: Vec<Arc<str>> = self
            .services()
            .into_iter()
            .filter(|s| s.workflow().auto_startup())
            .map(|s| Arc::clone(s.id()))
            .collect();
        self.start_many(&ids, Op::Bootstrap).await
    }

    /// Starts `ids` in two phases: warm up all, then start consumers in ascending rank.
    ///
    /// The first failure is recorded and returned; the failing workflow is cleaned up.
    pub(crate) async fn start_many(&self, ids: &[Arc<str>], op: Op) -> Result<(), ContextError> {
        let _guard = self.lock.lock().await;
        if !self.runnable(op) {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            let service = self.require(id)?;
            if service.status() == ServiceStatus::Started {
                continue;
            }
            batch.push(service);
        }
        // explicit orders claim their ranks before auto ranks are handed out
        batch.sort_by_key(|s| (s.workflow().startup_order().is_none(), s.seq()));
        let mut orders = Vec::with_capacity(batch.len());
        for service in &batch {
            self.assign_rank(service)?;
            if let Some(order) = service.startup_order() {
                orders.push(order);
            }
        }
        orders.sort();

        for order in &orders {
            let service = order.service();
            if service.status().is_suspended() {
                continue;
            }
            if let Err(cause) = service.warm_up(&self.endpoints).await {
                return Err(self.start_failed(service, cause).await);
            }
        }
        for order in &orders {
            self.start_locked(order.service()).await?;
        }
        Ok(())
    }

    /// Force-drains every running workflow, then stops all services.
    pub(crate) async fn stop_all(&self) -> Result<ShutdownOutcome, ContextError> {
        let _guard = self.lock.lock().await;
        let orders: Vec<_> = self
            .startup_orders()
            .into_iter()
            .filter(|o| !o.service().status().is_stopped())
            .collect();

        let outcome = self.coordinator.shutdown_forced(&orders).await?;

        let mut services = self.services();
        services.sort_by_key(|s| std::cmp::Reverse(s.rank()));
        for service in services {
            if service.status().is_stopped() {
                continue;
            }
            if let Some(err) = service.stop_services().await {
                tracing::warn!(workflow = %service.id(), error = %err, "failed to stop workflow services");
            }
            self.bus
                .publish(Event::new(EventKind::WorkflowStopped).with_workflow(Arc::clone(service.id())));
        }
        Ok(outcome)
    }

    /// Suspends every started workflow; returns the ids that were started.
    pub(crate) async fn suspend_all(&self, timeout: Option<Duration>) -> Result<Vec<Arc<str>>, ContextError> {
        let _guard = self.lock.lock().await;
        let orders: Vec<_> = self
            .startup_orders()
            .into_iter()
            .filter(|o| o.service().status() == ServiceStatus::Started)
            .collect();
        let ids: Vec<Arc<str>> = orders.iter().map(|o| Arc::clone(o.id())).collect();
        if orders.is_empty() {
            return Ok(ids);
        }

        let timeout = timeout.unwrap_or(self.coordinator.config().timeout);
        self.coordinator.suspend(&orders, timeout).await?;

        for order in &orders {
            let service = order.service();
            if service.status().is_suspended() {
                self.bus
                    .publish(Event::new(EventKind::WorkflowSuspended).with_workflow(Arc::clone(service.id())));
            } else if service.status() == ServiceStatus::Stopping {
                self.finish_stop(service).await;
            }
        }
        Ok(ids)
    }

    /// Resumes `ids` in ascending rank; returns the first failure after trying all.
    pub(crate) async fn resume_all(&self, ids: &[Arc<str>]) -> Result<(), ContextError> {
        let _guard = self.lock.lock().await;
        let mut orders: Vec<_> = ids
            .iter()
            .filter_map(|id| self.get(id))
            .filter_map(|s| s.startup_order())
            .collect();
        orders.sort();

        let mut first_err = None;
        for order in &orders {
            if let Err(err) = self.resume_locked(order.service()).await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drops pooled continuations of every pipeline.
    pub(crate) fn release_advice_infra(&self) {
        for service in self.services() {
            service.pipeline().clear_pool();
        }
    }

    // ---- locked helpers -----------------------------------------------------

    fn assign_rank(&self, service: &WorkflowService) -> Result<i32, ContextError> {
        if let Some(rank) = service.rank() {
            return Ok(rank);
        }
        let services = self.services.read();
        let holder = |rank: i32| {
            services
                .values()
                .find(|o| o.id() != service.id() && o.rank() == Some(rank))
        };
        match service.workflow().startup_order() {
            Some(order) => match holder(order) {
                Some(first) => Err(ContextError::DuplicateStartupOrder {
                    order,
                    first: Arc::clone(first.id()),
                    second: Arc::clone(service.id()),
                }),
                None => Ok(service.assign_rank(order)),
            },
            None => loop {
                let rank = self.next_rank.fetch_add(1, Ordering::Relaxed);
                if holder(rank).is_none() {
                    break Ok(service.assign_rank(rank));
                }
            },
        }
    }

    async fn start_locked(&self, service: &Arc<WorkflowService>) -> Result<(), ContextError> {
        match service.status() {
            ServiceStatus::Started => return Ok(()),
            ServiceStatus::Suspended => return self.resume_suspended(service).await,
            _ => {}
        }
        let id = service.id();
        let rank = self.assign_rank(service)?;
        self.bus
            .publish(Event::new(EventKind::WorkflowStarting).with_workflow(Arc::clone(id)));

        let started = async {
            service.warm_up(&self.endpoints).await?;
            service.start_consumer().await
        };
        if let Err(cause) = started.await {
            return Err(self.start_failed(service, cause).await);
        }

        self.errors.remove(id);
        tracing::info!(workflow = %id, rank, "workflow started");
        self.bus
            .publish(Event::new(EventKind::WorkflowStarted).with_workflow(Arc::clone(id)));
        Ok(())
    }

    async fn start_failed(&self, service: &WorkflowService, cause: ServiceError) -> ContextError {
        let id = service.id();
        tracing::warn!(workflow = %id, error = %cause, "workflow failed to start");
        if let Some(err) = service.stop_services().await {
            tracing::debug!(workflow = %id, error = %err, "cleanup after failed start");
        }
        self.bus.publish(
            Event::new(EventKind::WorkflowStartFailed)
                .with_workflow(Arc::clone(id))
                .with_reason(cause.to_string()),
        );
        self.record(id, WorkflowPhase::Start, cause)
    }

    async fn stop_locked(
        &self,
        service: &Arc<WorkflowService>,
        timeout: Option<Duration>,
        abort_after_timeout: bool,
    ) -> Result<bool, ContextError> {
        if service.status().is_stopped() {
            return Ok(true);
        }
        let id = service.id();
        let timeout = timeout.unwrap_or(self.coordinator.config().timeout);
        self.bus.publish(
            Event::new(EventKind::WorkflowStopping)
                .with_workflow(Arc::clone(id))
                .with_timeout(timeout),
        );

        if let Some(order) = service.startup_order() {
            let was_suspended = service.status().is_suspended();
            let outcome = self
                .coordinator
                .shutdown_one(&order, timeout, abort_after_timeout)
                .await?;
            if outcome == ShutdownOutcome::Aborted {
                self.restore(service, was_suspended).await?;
                return Ok(false);
            }
        }

        if let Some(cause) = service.stop_services().await {
            self.errors.insert(
                Arc::clone(id),
                WorkflowError::new(Arc::clone(id), WorkflowPhase::Stop, cause.clone()),
            );
            tracing::warn!(workflow = %id, error = %cause, "workflow stopped with errors");
        }
        tracing::info!(workflow = %id, "workflow stopped");
        self.bus
            .publish(Event::new(EventKind::WorkflowStopped).with_workflow(Arc::clone(id)));
        Ok(true)
    }

    /// Puts an aborted workflow back into the state it had before the stop.
    async fn restore(&self, service: &WorkflowService, was_suspended: bool) -> Result<(), ContextError> {
        let id = service.id();
        tracing::warn!(workflow = %id, "stop aborted; restoring workflow");
        if was_suspended && service.can_suspend() {
            service.set_status(ServiceStatus::Suspended);
            return Ok(());
        }
        service
            .start_consumer()
            .await
            .map_err(|cause| self.record(id, WorkflowPhase::Start, cause))
    }

    async fn finish_stop(&self, service: &WorkflowService) {
        if let Some(err) = service.stop_services().await {
            tracing::warn!(workflow = %service.id(), error = %err, "failed to stop workflow services");
        }
        self.bus
            .publish(Event::new(EventKind::WorkflowStopped).with_workflow(Arc::clone(service.id())));
    }

    async fn resume_locked(&self, service: &Arc<WorkflowService>) -> Result<(), ContextError> {
        match service.status() {
            ServiceStatus::Suspended => self.resume_suspended(service).await,
            status if status.is_stopped() => self.start_locked(service).await,
            _ => Ok(()),
        }
    }

    async fn resume_suspended(&self, service: &WorkflowService) -> Result<(), ContextError> {
        let id = service.id();
        service
            .resume_consumer()
            .await
            .map_err(|cause| self.record(id, WorkflowPhase::Resume, cause))?;
        tracing::info!(workflow = %id, "workflow resumed");
        self.bus
            .publish(Event::new(EventKind::WorkflowResumed).with_workflow(Arc::clone(id)));
        Ok(())
    }
}
