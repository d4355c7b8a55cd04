//! # Service capabilities.
//!
//! Every managed component (consumer, endpoint, nested processor service) is a
//! [`Service`]. Optional capabilities are discovered through accessor methods
//! instead of down-casting:
//!
//! ```text
//! Service ──► shutdown_aware()    → Option<&dyn ShutdownAware>    (consumers that hold pending work)
//!         └─► shutdown_prepared() → Option<&dyn ShutdownPrepared> (services notified before stop)
//! ```

use async_trait::async_trait;

use super::definition::ShutdownRunningTask;
use crate::error::ServiceError;

/// A start/stop-able component.
///
/// `suspend`/`resume` default to `stop`/`start`; services that can pause without
/// releasing resources override them and return `true` from [`is_suspendable`](Self::is_suspendable).
#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;

    fn is_suspendable(&self) -> bool {
        false
    }

    async fn suspend(&self) -> Result<(), ServiceError> {
        self.stop().await
    }

    async fn resume(&self) -> Result<(), ServiceError> {
        self.start().await
    }

    /// Shutdown-aware capability (consumers with their own pending work).
    fn shutdown_aware(&self) -> Option<&dyn ShutdownAware> {
        None
    }

    /// Shutdown-prepared capability (notified before being stopped).
    fn shutdown_prepared(&self) -> Option<&dyn ShutdownPrepared> {
        None
    }
}

/// Receives a notification before the service is stopped or suspended.
pub trait ShutdownPrepared: Send + Sync {
    /// `suspend_only` is `true` for suspension; `forced` once the drain timed out.
    fn prepare_shutdown(&self, suspend_only: bool, forced: bool);
}

/// Consumer that can object to immediate shutdown while it still holds work.
pub trait ShutdownAware: ShutdownPrepared {
    /// Returns `true` to be shut down in the deferred (drain-first) pass.
    fn defer_shutdown(&self, running: ShutdownRunningTask) -> bool;

    /// Exchanges accepted by the consumer but not yet handed to the pipeline.
    fn pending_exchanges(&self) -> usize;
}
