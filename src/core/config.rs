//! # Context configuration.
//!
//! [`ContextConfig`] groups every knob of the runtime:
//! - [`ShutdownConfig`] graceful-then-forced shutdown behavior;
//! - [`PipelineConfig`] advice pipeline options (continuation pooling, built-in advices);
//! - [`PoolProfile`] sizing of worker pools handed out by the executor provider.
//!
//! ## Sentinel values
//! - `PoolProfile::max_queue_size = 0` → unbounded queue
//! - `PipelineConfig::pool_capacity = 0` → continuations are never retained
//!
//! All fields are public; prefer the helper accessors over sentinel checks.

use std::time::Duration;

/// Top-level configuration of a [`Context`](crate::Context).
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Context name used in logs.
    pub name: String,
    /// Start workflows again when the context is restarted after a stop.
    ///
    /// The first start always starts workflows (each honoring its own auto-startup flag).
    pub auto_startup: bool,
    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
    /// Grace given to worker pools when the context releases them.
    pub executor_grace: Duration,
    /// Shutdown coordinator settings.
    pub shutdown: ShutdownConfig,
    /// Advice pipeline settings.
    pub pipeline: PipelineConfig,
}

impl ContextConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            name: "flowvisor".to_string(),
            auto_startup: true,
            bus_capacity: 1024,
            executor_grace: Duration::from_secs(10),
            shutdown: ShutdownConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Settings of the [`ShutdownCoordinator`](crate::ShutdownCoordinator).
#[derive(Clone, Debug)]
pub struct ShutdownConfig {
    /// Default drain timeout (must be positive).
    pub timeout: Duration,
    /// How often the drain re-checks in-flight counts.
    pub poll_interval: Duration,
    /// Force-stop remaining workflows when the timeout elapses.
    ///
    /// When `false` and the caller did not ask to abort, the remaining work is abandoned.
    pub shutdown_now_on_timeout: bool,
    /// Shut workflows down in reverse startup order.
    pub reverse_order: bool,
    /// Log every in-flight exchange when the timeout elapses.
    pub log_inflight_on_timeout: bool,
    /// Downgrade timeout logging to debug.
    pub suppress_logging_on_timeout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            poll_interval: Duration::from_secs(1),
            shutdown_now_on_timeout: true,
            reverse_order: true,
            log_inflight_on_timeout: true,
            suppress_logging_on_timeout: false,
        }
    }
}

/// Settings of every [`AdvicePipeline`](crate::AdvicePipeline) built by the context.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Reuse continuation objects across exchanges.
    pub pooled: bool,
    /// Maximum idle continuations retained per pipeline.
    pub pool_capacity: usize,
    /// Record per-workflow message history on exchanges.
    pub message_history: bool,
    /// Emit a `tracing` record around every exchange.
    pub tracing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pooled: true,
            pool_capacity: 128,
            message_history: false,
            tracing: false,
        }
    }
}

/// What a full pool does with new work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Refuse with [`PoolError::Rejected`](crate::PoolError::Rejected).
    #[default]
    Abort,
    /// Drop with [`PoolError::Discarded`](crate::PoolError::Discarded).
    Discard,
}

/// Sizing of a worker pool.
#[derive(Clone, Debug)]
pub struct PoolProfile {
    /// Concurrent slots (min 1).
    pub pool_size: usize,
    /// Tasks allowed to wait for a slot (`0` = unbounded).
    pub max_queue_size: usize,
    pub rejection: RejectionPolicy,
}

impl PoolProfile {
    /// Single worker, unbounded queue.
    pub fn single() -> Self {
        Self::fixed(1)
    }

    /// `n` workers, unbounded queue.
    pub fn fixed(n: usize) -> Self {
        Self {
            pool_size: n.max(1),
            max_queue_size: 0,
            rejection: RejectionPolicy::Abort,
        }
    }

    /// Returns the queue bound as an `Option` (`None` = unbounded).
    #[inline]
    pub fn queue_limit(&self) -> Option<usize> {
        (self.max_queue_size > 0).then_some(self.max_queue_size)
    }
}

impl Default for PoolProfile {
    fn default() -> Self {
        Self::fixed(10)
    }
}
