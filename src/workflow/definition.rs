//! # Workflow definition.
//!
//! A [`Workflow`] is the static description of one message route: the URI it
//! consumes from, the processing logic, user advices, nested services, startup
//! ordering and shutdown policies. Build one with [`Workflow::builder`].
//!
//! ```rust
//! use std::sync::Arc;
//! use flowvisor::{ProcessorFn, ShutdownWorkflow, Workflow};
//!
//! let wf = Workflow::builder("orders")
//!     .from("queue:orders")
//!     .startup_order(10)
//!     .shutdown_workflow(ShutdownWorkflow::Defer)
//!     .build(Arc::new(ProcessorFn::new(|_ex| Ok(()))));
//!
//! assert_eq!(&**wf.id(), "orders");
//! assert_eq!(wf.startup_order(), Some(10));
//! ```
//!
//! ## Controller back-reference
//! A workflow may be owned by a [`WorkflowController`] (the supervising controller).
//! The reference is weak; manual lifecycle calls on the registry are routed to the
//! controller only while it is attached and alive.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::service::Service;
use crate::error::ContextError;
use crate::pipeline::{AdviceRef, ProcessorRef, WorkflowPolicy};

/// How a workflow is ordered relative to others during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownWorkflow {
    /// Stop in the immediate pass unless the consumer objects.
    #[default]
    Default,
    /// Always stop in the deferred pass, after in-flight work drained.
    Defer,
}

/// How much pending work a consumer completes before it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownRunningTask {
    /// Finish the exchange in progress only.
    CompleteCurrentTaskOnly,
    /// Finish every pending exchange.
    #[default]
    CompleteAllTasks,
}

/// Owner of supervised workflows; manual operations are routed through it.
#[async_trait]
pub trait WorkflowController: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn start_workflow(&self, id: &str) -> Result<(), ContextError>;

    async fn stop_workflow(
        &self,
        id: &str,
        timeout: Option<Duration>,
        abort_after_timeout: bool,
    ) -> Result<bool, ContextError>;

    async fn suspend_workflow(&self, id: &str, timeout: Option<Duration>) -> Result<(), ContextError>;

    async fn resume_workflow(&self, id: &str) -> Result<(), ContextError>;
}

/// Static description of a message workflow.
pub struct Workflow {
    id: Arc<str>,
    from: String,
    to: Vec<String>,
    processor: ProcessorRef,
    advices: Vec<AdviceRef>,
    policies: Vec<Arc<dyn WorkflowPolicy>>,
    services: Vec<Arc<dyn Service>>,
    startup_order: Option<i32>,
    auto_startup: bool,
    suspension: bool,
    shutdown_workflow: ShutdownWorkflow,
    running_task: Mutex<ShutdownRunningTask>,
    configured_running_task: ShutdownRunningTask,
    properties: RwLock<HashMap<String, Value>>,
    controller: RwLock<Option<Weak<dyn WorkflowController>>>,
}

impl Workflow {
    pub fn builder(id: impl Into<Arc<str>>) -> WorkflowBuilder {
        WorkflowBuilder::new(id.into())
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    /// URI of the consuming endpoint.
    pub fn from_uri(&self) -> &str {
        &self.from
    }

    /// Every endpoint URI this workflow references (consumer first).
    pub fn endpoint_uris(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.from.as_str()).chain(self.to.iter().map(String::as_str))
    }

    pub fn processor(&self) -> &ProcessorRef {
        &self.processor
    }

    pub fn advices(&self) -> &[AdviceRef] {
        &self.advices
    }

    pub fn policies(&self) -> &[Arc<dyn WorkflowPolicy>] {
        &self.policies
    }

    /// Nested services started before the consumer and stopped after it.
    pub fn services(&self) -> &[Arc<dyn Service>] {
        &self.services
    }

    pub fn startup_order(&self) -> Option<i32> {
        self.startup_order
    }

    pub fn auto_startup(&self) -> bool {
        self.auto_startup
    }

    /// Whether the workflow may be suspended rather than stopped.
    pub fn supports_suspension(&self) -> bool {
        self.suspension
    }

    pub fn shutdown_workflow(&self) -> ShutdownWorkflow {
        self.shutdown_workflow
    }

    pub fn running_task(&self) -> ShutdownRunningTask {
        *self.running_task.lock()
    }

    pub(crate) fn set_running_task(&self, running: ShutdownRunningTask) {
        *self.running_task.lock() = running;
    }

    /// Puts back the running-task policy the workflow was built with.
    pub(crate) fn reset_running_task(&self) {
        *self.running_task.lock() = self.configured_running_task;
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.read().get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.write().insert(key.into(), value.into());
    }

    pub fn remove_property(&self, key: &str) -> Option<Value> {
        self.properties.write().remove(key)
    }

    /// The owning controller, if attached and still alive.
    pub fn controller(&self) -> Option<Arc<dyn WorkflowController>> {
        self.controller.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn attach_controller(&self, controller: Weak<dyn WorkflowController>) {
        *self.controller.write() = Some(controller);
    }

    pub(crate) fn detach_controller(&self) {
        *self.controller.write() = None;
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("startup_order", &self.startup_order)
            .field("auto_startup", &self.auto_startup)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Workflow`].
pub struct WorkflowBuilder {
    id: Arc<str>,
    from: String,
    to: Vec<String>,
    advices: Vec<AdviceRef>,
    policies: Vec<Arc<dyn WorkflowPolicy>>,
    services: Vec<Arc<dyn Service>>,
    startup_order: Option<i32>,
    auto_startup: bool,
    suspension: bool,
    shutdown_workflow: ShutdownWorkflow,
    running_task: ShutdownRunningTask,
    properties: HashMap<String, Value>,
}

impl WorkflowBuilder {
    fn new(id: Arc<str>) -> Self {
        Self {
            from: format!("direct:{id}"),
            id,
            to: Vec::new(),
            advices: Vec::new(),
            policies: Vec::new(),
            services: Vec::new(),
            startup_order: None,
            auto_startup: true,
            suspension: true,
            shutdown_workflow: ShutdownWorkflow::Default,
            running_task: ShutdownRunningTask::CompleteAllTasks,
            properties: HashMap::new(),
        }
    }

    /// Consuming endpoint URI (default: `direct:<id>`).
    pub fn from(mut self, uri: impl Into<String>) -> Self {
        self.from = uri.into();
        self
    }

    /// Additional endpoint the pipeline produces to; started during warm-up.
    pub fn to(mut self, uri: impl Into<String>) -> Self {
        self.to.push(uri.into());
        self
    }

    pub fn advice(mut self, advice: AdviceRef) -> Self {
        self.advices.push(advice);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn WorkflowPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn startup_order(mut self, order: i32) -> Self {
        self.startup_order = Some(order);
        self
    }

    pub fn auto_startup(mut self, auto: bool) -> Self {
        self.auto_startup = auto;
        self
    }

    pub fn supports_suspension(mut self, suspension: bool) -> Self {
        self.suspension = suspension;
        self
    }

    pub fn shutdown_workflow(mut self, policy: ShutdownWorkflow) -> Self {
        self.shutdown_workflow = policy;
        self
    }

    pub fn shutdown_running_task(mut self, running: ShutdownRunningTask) -> Self {
        self.running_task = running;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn build(self, processor: ProcessorRef) -> Workflow {
        Workflow {
            id: self.id,
            from: self.from,
            to: self.to,
            processor,
            advices: self.advices,
            policies: self.policies,
            services: self.services,
            startup_order: self.startup_order,
            auto_startup: self.auto_startup,
            suspension: self.suspension,
            shutdown_workflow: self.shutdown_workflow,
            running_task: Mutex::new(self.running_task),
            configured_running_task: self.running_task,
            properties: RwLock::new(self.properties),
            controller: RwLock::new(None),
        }
    }
}
