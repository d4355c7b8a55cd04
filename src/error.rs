//! Error types used by the flowvisor runtime, workflows and exchanges.
//!
//! - [`ContextError`] errors raised by the context lifecycle and registry operations.
//! - [`WorkflowError`] structured per-workflow failure record (id + phase + cause).
//! - [`ServiceError`] failures of individual services (consumers, endpoints, processors).
//! - [`ShutdownError`] failures of the shutdown coordinator itself.
//! - [`ProcessError`] failures attached to an [`Exchange`](crate::Exchange).
//! - [`PoolError`] worker pool admission failures.
//! - [`VetoStartup`] refusal raised by a startup hook.
//! - [`SupervisionError`] supervision outcomes reported to a health sink.
//!
//! Every enum exposes `as_label()`, a short stable snake_case label for logs/metrics.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::core::ContextStatus;
use crate::workflow::ServiceStatus;

/// # Errors produced by the context and the workflow registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    /// A startup hook refused initialization and asked for the veto to be rethrown.
    #[error("context startup vetoed: {reason}")]
    Vetoed {
        /// Reason given by the hook.
        reason: String,
    },

    /// Operation is not allowed in the current context status.
    #[error("cannot {op} while context is {status}")]
    InvalidState {
        /// Attempted operation.
        op: &'static str,
        /// Status observed at call time.
        status: ContextStatus,
    },

    /// A single workflow failed during the named phase.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// A workflow with the same id is already registered.
    #[error("workflow {id} already exists")]
    DuplicateWorkflow {
        /// Conflicting id.
        id: Arc<str>,
    },

    /// No workflow is registered under this id.
    #[error("workflow {id} not found")]
    UnknownWorkflow {
        /// Requested id.
        id: Arc<str>,
    },

    /// Two workflows claim the same explicit startup order.
    #[error("startup order {order} is used by both {first} and {second}")]
    DuplicateStartupOrder {
        /// The contested rank.
        order: i32,
        /// Workflow that already holds the rank.
        first: Arc<str>,
        /// Workflow that asked for it.
        second: Arc<str>,
    },

    /// Removal requires the workflow to be stopped first.
    #[error("workflow {id} must be stopped before removal (status: {status})")]
    NotStopped {
        /// Workflow id.
        id: Arc<str>,
        /// Current status.
        status: ServiceStatus,
    },

    /// An include/exclude pattern could not be compiled.
    #[error("invalid workflow pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// The shutdown coordinator failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl ContextError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use flowvisor::ContextError;
    ///
    /// let err = ContextError::Vetoed { reason: "maintenance".into() };
    /// assert_eq!(err.as_label(), "context_vetoed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ContextError::Vetoed { .. } => "context_vetoed",
            ContextError::InvalidState { .. } => "context_invalid_state",
            ContextError::Workflow(e) => e.phase.as_label(),
            ContextError::DuplicateWorkflow { .. } => "workflow_duplicate",
            ContextError::UnknownWorkflow { .. } => "workflow_unknown",
            ContextError::DuplicateStartupOrder { .. } => "workflow_duplicate_startup_order",
            ContextError::NotStopped { .. } => "workflow_not_stopped",
            ContextError::InvalidPattern { .. } => "context_invalid_pattern",
            ContextError::Shutdown(e) => e.as_label(),
        }
    }

    /// Returns the structured workflow error, if this error carries one.
    pub fn as_workflow_error(&self) -> Option<&WorkflowError> {
        match self {
            ContextError::Workflow(e) => Some(e),
            _ => None,
        }
    }
}

/// Lifecycle phase in which a workflow failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowPhase {
    Start,
    Stop,
    Suspend,
    Resume,
    Shutdown,
    Remove,
}

impl WorkflowPhase {
    /// Label used when the failure surfaces through [`ContextError::as_label`].
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkflowPhase::Start => "workflow_start_failed",
            WorkflowPhase::Stop => "workflow_stop_failed",
            WorkflowPhase::Suspend => "workflow_suspend_failed",
            WorkflowPhase::Resume => "workflow_resume_failed",
            WorkflowPhase::Shutdown => "workflow_shutdown_failed",
            WorkflowPhase::Remove => "workflow_remove_failed",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowPhase::Start => "start",
            WorkflowPhase::Stop => "stop",
            WorkflowPhase::Suspend => "suspend",
            WorkflowPhase::Resume => "resume",
            WorkflowPhase::Shutdown => "shutdown",
            WorkflowPhase::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// # Structured per-workflow failure.
///
/// Recorded by the registry before the failure is returned to the caller,
/// so operators can inspect the last error of every workflow.
#[derive(Error, Debug, Clone)]
#[error("workflow {id} failed to {phase}: {cause}")]
pub struct WorkflowError {
    /// Workflow id.
    pub id: Arc<str>,
    /// Phase that failed.
    pub phase: WorkflowPhase,
    /// Underlying service failure.
    pub cause: ServiceError,
    /// When the failure was recorded.
    pub at: SystemTime,
}

impl WorkflowError {
    /// Creates a new record stamped with the current time.
    pub fn new(id: impl Into<Arc<str>>, phase: WorkflowPhase, cause: ServiceError) -> Self {
        Self {
            id: id.into(),
            phase,
            cause,
            at: SystemTime::now(),
        }
    }
}

/// # Errors produced by services (consumers, endpoints, processor services).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    /// Service operation failed.
    #[error("{reason}")]
    Failed {
        /// Failure message.
        reason: String,
    },

    /// Endpoint URI could not be resolved.
    #[error("cannot resolve endpoint {uri}: {reason}")]
    Unresolvable {
        /// Requested URI.
        uri: String,
        /// Resolver message.
        reason: String,
    },

    /// Arbitrary error raised by user code.
    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl ServiceError {
    /// Shorthand for [`ServiceError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        ServiceError::Failed {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Failed { .. } => "service_failed",
            ServiceError::Unresolvable { .. } => "service_unresolvable",
            ServiceError::Other(_) => "service_other",
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Other(Arc::new(err))
    }
}

/// # Errors produced by the shutdown coordinator.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ShutdownError {
    /// Shutdown timeout must be strictly positive.
    #[error("shutdown timeout must be positive")]
    InvalidTimeout,

    /// The drain worker panicked or could not run.
    #[error("shutdown worker failed: {reason}")]
    WorkerFailed {
        /// Failure description.
        reason: String,
    },

    /// The worker pool refused the drain task.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ShutdownError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownError::InvalidTimeout => "shutdown_invalid_timeout",
            ShutdownError::WorkerFailed { .. } => "shutdown_worker_failed",
            ShutdownError::Pool(e) => e.as_label(),
        }
    }
}

/// # Errors attached to an exchange while it flows through a pipeline.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The exchange arrived after forced shutdown began.
    #[error("rejected: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// An advice hook failed.
    #[error("advice {advice} failed: {reason}")]
    Advice {
        /// Advice name.
        advice: String,
        /// Failure message.
        reason: String,
    },

    /// The wrapped processing logic failed.
    #[error("processing failed: {reason}")]
    Failed {
        /// Failure message.
        reason: String,
    },
}

impl ProcessError {
    /// Shorthand for [`ProcessError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        ProcessError::Failed {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Rejected { .. } => "exchange_rejected",
            ProcessError::Advice { .. } => "exchange_advice_failed",
            ProcessError::Failed { .. } => "exchange_failed",
        }
    }

    /// Returns `true` for rejections caused by forced shutdown.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ProcessError::Rejected { .. })
    }
}

/// # Worker pool admission errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Queue is full and the pool rejects new work.
    #[error("pool {pool} rejected task: {queued} tasks already queued")]
    Rejected {
        /// Pool name.
        pool: Arc<str>,
        /// Queue depth at rejection time.
        queued: usize,
    },

    /// Queue is full and the pool silently discards new work.
    #[error("pool {pool} discarded task")]
    Discarded {
        /// Pool name.
        pool: Arc<str>,
    },

    /// Pool has been shut down.
    #[error("pool {pool} is shut down")]
    Shutdown {
        /// Pool name.
        pool: Arc<str>,
    },
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::Rejected { .. } => "pool_rejected",
            PoolError::Discarded { .. } => "pool_discarded",
            PoolError::Shutdown { .. } => "pool_shutdown",
        }
    }
}

/// # Veto raised by a startup hook.
///
/// With `rethrow == false` the context only ends `Failed` and `start` returns `Ok`.
#[derive(Error, Debug, Clone)]
#[error("startup vetoed: {reason}")]
pub struct VetoStartup {
    /// Why the hook refused startup.
    pub reason: String,
    /// Surface the veto as [`ContextError::Vetoed`] instead of swallowing it.
    pub rethrow: bool,
}

impl VetoStartup {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            rethrow: false,
        }
    }

    pub fn rethrow(mut self) -> Self {
        self.rethrow = true;
        self
    }
}

/// # Supervision outcomes reported to a health sink.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SupervisionError {
    /// Restart budget consumed without a successful start.
    #[error("workflow {id} exhausted {attempts} restart attempts after {elapsed:?}; last error: {}", last_error.as_deref().unwrap_or("none"))]
    RetryExhausted {
        /// Workflow id.
        id: Arc<str>,
        /// Failed backoff attempts.
        attempts: u32,
        /// Time spent retrying.
        elapsed: Duration,
        /// Last recorded failure.
        last_error: Option<Arc<str>>,
    },

    /// A start failed and the workflow is waiting for its next attempt.
    #[error("workflow {id} is restarting after: {last_error}")]
    Restarting {
        /// Workflow id.
        id: Arc<str>,
        /// Failure that triggered the restart.
        last_error: Arc<str>,
    },
}

impl SupervisionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisionError::RetryExhausted { .. } => "supervision_retry_exhausted",
            SupervisionError::Restarting { .. } => "supervision_restarting",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_label_follows_phase() {
        let err: ContextError =
            WorkflowError::new("orders", WorkflowPhase::Start, ServiceError::failed("boom")).into();
        assert_eq!(err.as_label(), "workflow_start_failed");
        assert_eq!(err.to_string(), "workflow orders failed to start: boom");
        assert!(err.as_workflow_error().is_some());
    }

    #[test]
    fn anyhow_errors_convert_into_service_errors() {
        let err: ServiceError = anyhow::anyhow!("socket closed").into();
        assert_eq!(err.as_label(), "service_other");
        assert_eq!(err.to_string(), "socket closed");
    }

    #[test]
    fn retry_exhausted_renders_missing_last_error() {
        let err = SupervisionError::RetryExhausted {
            id: "billing".into(),
            attempts: 3,
            elapsed: Duration::from_secs(6),
            last_error: None,
        };
        assert!(err.to_string().ends_with("last error: none"));
    }
}
