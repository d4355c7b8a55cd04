//! # flowvisor
//!
//! **Flowvisor** is the control core of a message-routing engine.
//!
//! It manages the lifecycle of independently running **workflows** (a consuming
//! endpoint connected to a processing pipeline), orders their startup and
//! shutdown, drains in-flight messages within a timeout before forcing a stop,
//! restarts failing workflows with backoff, and wraps every message in an ordered
//! chain of cross-cutting advices.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Workflow   │   │   Workflow   │   │   Workflow   │
//!     │   (orders)   │   │  (billing)   │   │   (audit)    │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Context (lifecycle state machine)                                │
//! │  - WorkflowRegistry (one mutation lock, ranks, last errors)       │
//! │  - ShutdownCoordinator (graceful drain, then abort or force)      │
//! │  - InflightTracker (exchanges currently inside a pipeline)        │
//! │  - EndpointRegistry (shared endpoints, resolver)                  │
//! │  - SupervisingController (optional backoff restarts)              │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │WorkflowServ. │   │WorkflowServ. │   │WorkflowServ. │   │
//!     │ consumer ──► │   │ consumer ──► │   │ consumer ──► │   │
//!     │AdvicePipeline│   │AdvicePipeline│   │AdvicePipeline│   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ WorkflowStarted  │ ShutdownDraining │ RestartFailed   │
//!      ▼                  ▼                  ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │               (capacity: ContextConfig::bus_capacity)             │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                            (per-sub queues)
//!                        ┌──────────┼──────────┐
//!                        ▼          ▼          ▼
//!                     sub1.on    sub2.on    subN.on
//!                     _event()   _event()   _event()
//! ```
//!
//! ### Message path
//! ```text
//! consumer ──► AdvicePipeline::process(exchange, callback)
//!                ├─ forced shutdown? ──► reject, callback(done_sync = true)
//!                ├─ before(): UnitOfWork → Inflight → policies → user advices
//!                ├─ processor.process(exchange, continuation)
//!                └─ continuation: after() in reverse → callback → back to pool
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Lifecycle**     | Build, init, start, stop, suspend and resume an engine.      | [`Context`], [`ContextBuilder`]             |
//! | **Workflows**     | Describe routes, their ordering and shutdown policies.       | [`Workflow`], [`ShutdownWorkflow`]          |
//! | **Shutdown**      | Timeout-bounded drain with abort/force escalation.           | [`ShutdownCoordinator`], [`ShutdownConfig`] |
//! | **Pipeline**      | Ordered before/after advices around asynchronous processing. | [`Advice`], [`AdvicePipeline`]              |
//! | **Supervision**   | Backoff restarts of failing workflows.                       | [`SupervisingController`], [`BackoffPolicy`]|
//! | **Subscriber API**| Observe runtime events (logging, metrics, custom).           | [`Subscribe`], [`Event`]                    |
//! | **Errors**        | Typed errors with stable labels.                             | [`ContextError`], [`ProcessError`]          |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber.
//! - `supervising`: exposes the supervising controller and its configuration.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowvisor::{ContextBuilder, ContextConfig, ProcessorFn, Workflow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), flowvisor::ContextError> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn flowvisor::Subscribe>> = vec![Arc::new(flowvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn flowvisor::Subscribe>> = Vec::new();
//!
//!     let ctx = ContextBuilder::new(ContextConfig::default())
//!         .with_subscribers(subs)
//!         .with_workflow(
//!             Workflow::builder("orders")
//!                 .from("direct:orders")
//!                 .build(Arc::new(ProcessorFn::new(|_ex| Ok(())))),
//!         )
//!         .build();
//!
//!     // starts, waits for SIGINT/SIGTERM, then stops gracefully
//!     ctx.run_until_signal().await
//! }
//! ```
mod backoff;
mod core;
mod error;
mod events;
mod executor;
mod pipeline;
mod subscribers;
mod workflow;

#[cfg(test)]
mod testing;

// ---- Public re-exports ----

pub use backoff::{BackoffPolicy, BackoffScheduler, BackoffState, BackoffStatus, BackoffTask, JitterPolicy};
pub use core::{
    Context, ContextBuilder, ContextConfig, ContextFactory, ContextState, ContextStatus, DefaultFactory,
    InflightExchange, InflightTracker, PipelineConfig, PoolProfile, RejectionPolicy, ShutdownConfig,
    ShutdownCoordinator, ShutdownFlag, ShutdownOutcome, StartupHook, WorkflowRegistry, wait_for_shutdown_signal,
};
pub use error::{
    ContextError, PoolError, ProcessError, ServiceError, ShutdownError, SupervisionError, VetoStartup,
    WorkflowError, WorkflowPhase,
};
pub use events::{Bus, Event, EventKind};
pub use executor::{DefaultExecutorProvider, ExecutorProvider, ManagedPool, WorkerPool};
pub use pipeline::{
    Advice, AdvicePipeline, AdviceRef, AdviceState, AsyncCallback, AsyncProcessorFn, ContinuationPool,
    InflightAdvice, MessageHistoryAdvice, PoolStats, Processor, ProcessorFn, ProcessorRef, TracingAdvice,
    UnitOfWorkAdvice, WorkflowPolicy, WorkflowPolicyAdvice, priority, process_async,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use workflow::{
    Endpoint, EndpointRef, EndpointRegistry, EndpointResolver, Exchange, FORCED_SHUTDOWN_PROPERTY, HistoryEntry,
    ServiceStatus, Service, ShutdownAware, ShutdownPrepared, ShutdownRunningTask, ShutdownWorkflow,
    StaticResolver, Workflow, WorkflowBuilder, WorkflowController, WorkflowService, WorkflowStartupOrder,
};

// Optional: supervising controller with backoff restarts.
// Enable with: `--features supervising`
#[cfg(feature = "supervising")]
mod supervising;
#[cfg(feature = "supervising")]
pub use supervising::{HealthSink, HealthState, SupervisingConfig, SupervisingController, WorkflowFilter};

// Optional: built-in subscriber rendering events through `tracing`.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
