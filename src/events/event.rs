//! # Runtime events emitted by the context, registry, coordinator and controller.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Context events**: lifecycle transitions of the whole context
//! - **Workflow events**: per-workflow lifecycle (added, started, stopped, failed...)
//! - **Shutdown events**: drain progress and timeout escalation
//! - **Supervision events**: backoff restarts and exhaustion
//!
//! The [`Event`] struct carries optional metadata such as the workflow id,
//! reasons, attempt numbers, delays and in-flight counts.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use flowvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::WorkflowRestartFailed)
//!     .with_workflow("orders")
//!     .with_reason("connection refused")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(2));
//!
//! assert_eq!(ev.kind, EventKind::WorkflowRestartFailed);
//! assert_eq!(ev.workflow.as_deref(), Some("orders"));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `workflow`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `workflow`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Context events ===
    /// Context is starting (after init).
    ContextStarting,
    /// Context started; bootstrap pass finished.
    ContextStarted,
    /// Context start failed or was vetoed.
    ///
    /// Sets:
    /// - `reason`: failure message
    ContextStartupFailed,
    /// Context is suspending all started workflows.
    ContextSuspending,
    /// Context suspended.
    ContextSuspended,
    /// Context is resuming previously suspended workflows.
    ContextResuming,
    /// Context resumed.
    ContextResumed,
    /// Context is stopping.
    ContextStopping,
    /// Context stopped; all resources released.
    ContextStopped,

    // === Workflow events ===
    /// Workflow registered.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    WorkflowAdded,
    /// Workflow removed from the registry.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    WorkflowRemoved,
    /// Workflow consumer is being started.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    WorkflowStarting,
    /// Workflow consumer started.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    WorkflowStarted,
    /// Workflow failed to start.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    /// - `reason`: failure message
    WorkflowStartFailed,
    /// Workflow graceful stop requested.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    /// - `timeout_ms`: drain timeout
    WorkflowStopping,
    /// Workflow stopped.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    WorkflowStopped,
    /// Workflow suspended.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    WorkflowSuspended,
    /// Workflow resumed.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    WorkflowResumed,

    // === Shutdown events ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,
    /// Drain still waiting for in-flight exchanges.
    ///
    /// Sets:
    /// - `inflight`: remaining exchanges (tracked + pending)
    /// - `timeout_ms`: configured timeout
    ShutdownDraining,
    /// All workflows drained within the timeout.
    ShutdownCompleted,
    /// Timeout hit; workflows were stopped forcibly.
    ///
    /// Sets:
    /// - `inflight`: exchanges still in flight when forced
    ShutdownForced,
    /// Timeout hit; shutdown aborted and workflows kept running.
    ShutdownAborted,
    /// Timeout hit; shutdown neither forced nor aborted.
    ShutdownTimedOut,

    // === Supervision events ===
    /// Backoff delay scheduled before the next attempt.
    ///
    /// Sets:
    /// - `workflow`: backoff key (workflow id)
    /// - `attempt`: next attempt number
    /// - `delay_ms`: delay before the attempt
    BackoffScheduled,
    /// The supervising controller attempts to restart a workflow.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    /// - `attempt`: attempt number (1-based)
    WorkflowRestarting,
    /// Restart attempt failed.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    /// - `attempt`: attempt number (0 for the bootstrap attempt)
    /// - `reason`: failure message
    WorkflowRestartFailed,
    /// Restart budget exhausted; workflow no longer supervised.
    ///
    /// Sets:
    /// - `workflow`: workflow id
    /// - `attempt`: attempts made
    /// - `reason`: last failure
    WorkflowRestartExhausted,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Workflow id (or subscriber name for subscriber events).
    pub workflow: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Attempt count.
    pub attempt: Option<u32>,
    /// Delay before next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// In-flight exchange count.
    pub inflight: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            workflow: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            inflight: None,
        }
    }

    /// Attaches a workflow id.
    #[inline]
    pub fn with_workflow(mut self, id: impl Into<Arc<str>>) -> Self {
        self.workflow = Some(id.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an in-flight count.
    #[inline]
    pub fn with_inflight(mut self, n: usize) -> Self {
        self.inflight = Some(n as u64);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_workflow(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_workflow(subscriber)
            .with_reason(info)
    }

    /// Returns `true` for events produced by the subscriber set itself.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
