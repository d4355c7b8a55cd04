//! Backoff: delay policy, jitter and the keyed retry scheduler.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter) and the attempt/elapsed budget
//! - [`JitterPolicy`] randomization strategy to avoid thundering herd
//! - [`BackoffScheduler`] one cancellable retry loop per key on a worker pool
//!
//! ## Quick wiring
//! ```text
//! SupervisingConfig { backoff: BackoffPolicy, .. }
//!      └─► SupervisingController
//!            └─► BackoffScheduler::schedule(workflow_id, backoff, |state| registry.start(..))
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=2s, factor=1.0, max=60s, jitter=None, unlimited budget.

mod jitter;
mod policy;
mod scheduler;

pub use jitter::JitterPolicy;
pub use policy::BackoffPolicy;
pub use scheduler::{BackoffScheduler, BackoffState, BackoffStatus, BackoffTask};
