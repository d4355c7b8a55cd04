//! # LogWriter: renders runtime events through `tracing`.
//!
//! Maps every [`EventKind`] to a `tracing` record with structured fields, so
//! events flow into whatever subscriber the application installed
//! (`tracing_subscriber::fmt`, OpenTelemetry, ...).
//!
//! ## Levels
//! ```text
//! info  : context transitions, workflow started/stopped/suspended/resumed
//! warn  : start failures, restart failures, forced/aborted shutdown, overflow
//! error : restart exhaustion, subscriber panics, context startup failure
//! debug : backoff scheduling, drain progress
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber backed by `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let wf = e.workflow.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ContextStarting => info!(seq = e.seq, "context starting"),
            EventKind::ContextStarted => info!(seq = e.seq, "context started"),
            EventKind::ContextStartupFailed => {
                error!(seq = e.seq, reason, "context startup failed")
            }
            EventKind::ContextSuspending => info!(seq = e.seq, "context suspending"),
            EventKind::ContextSuspended => info!(seq = e.seq, "context suspended"),
            EventKind::ContextResuming => info!(seq = e.seq, "context resuming"),
            EventKind::ContextResumed => info!(seq = e.seq, "context resumed"),
            EventKind::ContextStopping => info!(seq = e.seq, "context stopping"),
            EventKind::ContextStopped => info!(seq = e.seq, "context stopped"),

            EventKind::WorkflowAdded => debug!(workflow = wf, "workflow added"),
            EventKind::WorkflowRemoved => info!(workflow = wf, "workflow removed"),
            EventKind::WorkflowStarting => debug!(workflow = wf, "workflow starting"),
            EventKind::WorkflowStarted => info!(workflow = wf, "workflow started"),
            EventKind::WorkflowStartFailed => {
                warn!(workflow = wf, reason, "workflow failed to start")
            }
            EventKind::WorkflowStopping => {
                debug!(workflow = wf, timeout_ms = ?e.timeout_ms, "workflow stopping")
            }
            EventKind::WorkflowStopped => info!(workflow = wf, "workflow stopped"),
            EventKind::WorkflowSuspended => info!(workflow = wf, "workflow suspended"),
            EventKind::WorkflowResumed => info!(workflow = wf, "workflow resumed"),

            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::ShutdownDraining => {
                debug!(inflight = ?e.inflight, timeout_ms = ?e.timeout_ms, "waiting for in-flight exchanges")
            }
            EventKind::ShutdownCompleted => info!("graceful shutdown completed"),
            EventKind::ShutdownForced => {
                warn!(inflight = ?e.inflight, "shutdown timeout; forcing stop")
            }
            EventKind::ShutdownAborted => warn!("shutdown timeout; aborted"),
            EventKind::ShutdownTimedOut => {
                warn!(inflight = ?e.inflight, "shutdown timeout; remaining work abandoned")
            }

            EventKind::BackoffScheduled => {
                debug!(workflow = wf, attempt = ?e.attempt, delay_ms = ?e.delay_ms, "backoff scheduled")
            }
            EventKind::WorkflowRestarting => {
                info!(workflow = wf, attempt = ?e.attempt, "restarting workflow")
            }
            EventKind::WorkflowRestartFailed => {
                warn!(workflow = wf, attempt = ?e.attempt, reason, "workflow restart failed")
            }
            EventKind::WorkflowRestartExhausted => {
                error!(workflow = wf, attempts = ?e.attempt, reason, "workflow restart exhausted")
            }

            EventKind::SubscriberOverflow => {
                warn!(subscriber = wf, reason, "subscriber dropped event")
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = wf, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
