use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Configuration for the supervising controller.
///
/// Pattern syntax is described in [`WorkflowFilter`](super::WorkflowFilter).
#[derive(Clone, Debug)]
pub struct SupervisingConfig {
    /// Workflows to supervise (empty = all).
    pub include: Vec<String>,
    /// Workflows never supervised; wins over `include`.
    pub exclude: Vec<String>,
    /// Delay before supervised workflows are first started (`ZERO` = start with the context).
    pub initial_delay: Duration,
    /// Restart policy applied per workflow.
    pub backoff: BackoffPolicy,
    /// Retry loops that may run at once; further restarts wait for a slot.
    pub thread_pool_size: usize,
    /// Report exhausted workflows to the health sink.
    pub unhealthy_on_exhausted: bool,
    /// Report workflows waiting for a restart to the health sink.
    pub unhealthy_on_restarting: bool,
}

impl Default for SupervisingConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            initial_delay: Duration::ZERO,
            backoff: BackoffPolicy::default(),
            thread_pool_size: 1,
            unhealthy_on_exhausted: true,
            unhealthy_on_restarting: false,
        }
    }
}

impl SupervisingConfig {
    /// Supervises every workflow with the given restart policy.
    pub fn with_backoff(backoff: BackoffPolicy) -> Self {
        Self {
            backoff,
            ..Self::default()
        }
    }
}
