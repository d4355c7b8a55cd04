//! Worker pools and the provider that owns them.
//!
//! - [`WorkerPool`] bounded tokio task pool with `Abort`/`Discard` rejection
//! - [`ExecutorProvider`] factory interface the context uses for every pool
//! - [`DefaultExecutorProvider`] tracking implementation released at context stop

mod pool;
mod provider;

pub use pool::WorkerPool;
pub use provider::{DefaultExecutorProvider, ExecutorProvider, ManagedPool};
