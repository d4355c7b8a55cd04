//! # Workflow service: the running form of a workflow.
//!
//! [`WorkflowService`] owns the advice pipeline, the consumer and the status of
//! one registered workflow. The registry drives it under its mutation lock; the
//! shutdown coordinator only touches its consumer.
//!
//! ```text
//! Initialized ──warm_up──► (endpoints + nested services started, consumer created)
//!             ──start_consumer──► Started ──suspend_consumer──► Suspended
//!                                   │  ▲                           │
//!                                   │  └──────resume_consumer──────┘
//!                                   └──stop_consumer──► Stopping ──stop_services──► Stopped
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use super::definition::{ShutdownRunningTask, Workflow};
use super::endpoint::{EndpointRef, EndpointRegistry};
use super::exchange::FORCED_SHUTDOWN_PROPERTY;
use super::service::Service;
use super::status::ServiceStatus;
use crate::error::ServiceError;
use crate::pipeline::{AdvicePipeline, ProcessorRef};

/// Runtime wrapper of a registered workflow.
pub struct WorkflowService {
    workflow: Arc<Workflow>,
    pipeline: Arc<AdvicePipeline>,
    seq: u64,
    status: RwLock<ServiceStatus>,
    consumer: Mutex<Option<Arc<dyn Service>>>,
    endpoint: Mutex<Option<EndpointRef>>,
    consumer_running: AtomicBool,
    warmed: AtomicBool,
    rank: OnceLock<i32>,
}

impl WorkflowService {
    pub(crate) fn new(workflow: Arc<Workflow>, pipeline: Arc<AdvicePipeline>, seq: u64) -> Self {
        Self {
            workflow,
            pipeline,
            seq,
            status: RwLock::new(ServiceStatus::Initialized),
            consumer: Mutex::new(None),
            endpoint: Mutex::new(None),
            consumer_running: AtomicBool::new(false),
            warmed: AtomicBool::new(false),
            rank: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &Arc<str> {
        self.workflow.id()
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn pipeline(&self) -> &Arc<AdvicePipeline> {
        &self.pipeline
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.read()
    }

    /// Registration sequence number.
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Rank assigned at first start.
    pub fn rank(&self) -> Option<i32> {
        self.rank.get().copied()
    }

    pub(crate) fn assign_rank(&self, rank: i32) -> i32 {
        *self.rank.get_or_init(|| rank)
    }

    pub fn consumer(&self) -> Option<Arc<dyn Service>> {
        self.consumer.lock().clone()
    }

    pub fn endpoint(&self) -> Option<EndpointRef> {
        self.endpoint.lock().clone()
    }

    /// Nested services of the workflow (excluding the consumer).
    pub fn services(&self) -> &[Arc<dyn Service>] {
        self.workflow.services()
    }

    /// Suspension requires both the workflow flag and a suspendable consumer.
    pub fn can_suspend(&self) -> bool {
        self.workflow.supports_suspension()
            && self.consumer().is_some_and(|c| c.is_suspendable())
    }

    pub fn is_consumer_running(&self) -> bool {
        self.consumer_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_status(&self, to: ServiceStatus) {
        let from = std::mem::replace(&mut *self.status.write(), to);
        if from != to {
            tracing::trace!(workflow = %self.id(), %from, %to, "workflow status");
        }
    }

    /// Resolves and starts endpoints, starts nested services and creates the consumer.
    ///
    /// Idempotent until [`stop_services`](Self::stop_services). On failure everything
    /// started so far is stopped again, endpoints first started by this attempt are
    /// released, and the status returns to `Stopped`.
    pub(crate) async fn warm_up(&self, endpoints: &EndpointRegistry) -> Result<(), ServiceError> {
        if self.warmed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.set_status(ServiceStatus::Starting);

        let mut started = Vec::new();
        let mut fresh = Vec::new();
        if let Err(err) = self.try_warm_up(endpoints, &mut started, &mut fresh).await {
            for service in started.iter().rev() {
                if let Err(stop_err) = service.stop().await {
                    tracing::debug!(workflow = %self.id(), service = service.name(), error = %stop_err, "cleanup after failed warm-up");
                }
            }
            for uri in fresh.iter().rev() {
                endpoints.release(uri).await;
            }
            self.consumer.lock().take();
            self.endpoint.lock().take();
            self.set_status(ServiceStatus::Stopped);
            return Err(err);
        }
        self.warmed.store(true, Ordering::Release);
        Ok(())
    }

    async fn try_warm_up(
        &self,
        endpoints: &EndpointRegistry,
        started: &mut Vec<Arc<dyn Service>>,
        fresh: &mut Vec<String>,
    ) -> Result<(), ServiceError> {
        let mut from = None;
        for uri in self.workflow.endpoint_uris() {
            let cached = endpoints.contains(uri);
            let endpoint = endpoints.acquire(uri).await?;
            if !cached {
                fresh.push(uri.to_string());
            }
            from.get_or_insert(endpoint);
        }
        let Some(from) = from else {
            return Err(ServiceError::failed(format!("workflow {} has no endpoint", self.id())));
        };
        *self.endpoint.lock() = Some(Arc::clone(&from));
        for service in self.workflow.services() {
            service.start().await?;
            started.push(Arc::clone(service));
        }
        let processor: ProcessorRef = Arc::clone(&self.pipeline) as ProcessorRef;
        let consumer = from.create_consumer(processor)?;
        *self.consumer.lock() = Some(consumer);
        Ok(())
    }

    /// Starts the consumer; the workflow is `Started` afterwards.
    pub(crate) async fn start_consumer(&self) -> Result<(), ServiceError> {
        let Some(consumer) = self.consumer() else {
            return Err(ServiceError::failed(format!(
                "workflow {} has no consumer; warm up first",
                self.id()
            )));
        };
        self.clear_forced();
        if !self.is_consumer_running() {
            consumer.start().await?;
            self.consumer_running.store(true, Ordering::Release);
        }
        self.set_status(ServiceStatus::Started);
        Ok(())
    }

    /// Stops the consumer only (no new exchanges enter the workflow).
    pub(crate) async fn stop_consumer(&self) -> Result<(), ServiceError> {
        self.set_status(ServiceStatus::Stopping);
        let Some(consumer) = self.consumer() else {
            return Ok(());
        };
        if self.consumer_running.swap(false, Ordering::AcqRel) {
            consumer.stop().await?;
        }
        Ok(())
    }

    /// Suspends the consumer; falls back to stopping it when not suspendable.
    pub(crate) async fn suspend_consumer(&self) -> Result<(), ServiceError> {
        if !self.can_suspend() {
            return self.stop_consumer().await;
        }
        self.set_status(ServiceStatus::Suspending);
        if let Some(consumer) = self.consumer() {
            consumer.suspend().await?;
        }
        self.set_status(ServiceStatus::Suspended);
        Ok(())
    }

    /// Resumes a suspended consumer.
    pub(crate) async fn resume_consumer(&self) -> Result<(), ServiceError> {
        if let Some(consumer) = self.consumer() {
            consumer.resume().await?;
        }
        self.consumer_running.store(true, Ordering::Release);
        self.clear_forced();
        self.set_status(ServiceStatus::Started);
        Ok(())
    }

    /// Stops consumer and nested services (best effort) and drops the consumer.
    ///
    /// Returns the first error observed.
    pub(crate) async fn stop_services(&self) -> Option<ServiceError> {
        let mut first_err = self.stop_consumer().await.err();
        for service in self.workflow.services().iter().rev() {
            if let Err(err) = service.stop().await {
                tracing::warn!(workflow = %self.id(), service = service.name(), error = %err, "failed to stop service");
                first_err.get_or_insert(err);
            }
        }
        self.consumer.lock().take();
        self.endpoint.lock().take();
        self.warmed.store(false, Ordering::Release);
        self.set_status(ServiceStatus::Stopped);
        first_err
    }

    /// Marks the workflow as being force-stopped: new exchanges are rejected and
    /// the consumer only completes its current task.
    pub(crate) fn mark_forced(&self) {
        self.workflow
            .set_running_task(ShutdownRunningTask::CompleteCurrentTaskOnly);
        self.workflow.set_property(FORCED_SHUTDOWN_PROPERTY, true);
        self.pipeline.mark_forced();
    }

    fn clear_forced(&self) {
        self.workflow.reset_running_task();
        self.workflow.remove_property(FORCED_SHUTDOWN_PROPERTY);
        self.pipeline.clear_forced();
    }

    /// Startup-order view, available once a rank has been assigned.
    pub fn startup_order(self: &Arc<Self>) -> Option<WorkflowStartupOrder> {
        self.rank().map(|rank| WorkflowStartupOrder {
            rank,
            service: Arc::clone(self),
        })
    }
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService")
            .field("id", self.id())
            .field("status", &self.status())
            .field("rank", &self.rank())
            .finish()
    }
}

/// A workflow service paired with its startup rank. Ordered by rank.
#[derive(Clone, Debug)]
pub struct WorkflowStartupOrder {
    rank: i32,
    service: Arc<WorkflowService>,
}

impl WorkflowStartupOrder {
    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn service(&self) -> &Arc<WorkflowService> {
        &self.service
    }

    pub fn id(&self) -> &Arc<str> {
        self.service.id()
    }
}

impl PartialEq for WorkflowStartupOrder {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for WorkflowStartupOrder {}

impl PartialOrd for WorkflowStartupOrder {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkflowStartupOrder {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank.cmp(&other.rank)
    }
}
