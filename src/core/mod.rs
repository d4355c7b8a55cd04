//! Runtime core: context lifecycle, registry and shutdown.
//!
//! The public entry point is [`Context`], built with [`ContextBuilder`].
//!
//! Internal modules:
//! - [`context`]: lifecycle state machine (build/init/start/stop/suspend/resume);
//! - [`registry`]: workflow services and their transitions under one mutation lock;
//! - [`shutdown`]: graceful-then-forced draining of workflows;
//! - [`inflight`]: in-flight exchange tracking;
//! - [`signals`]: cross-platform termination signal handling;
//! - [`builder`]: builder and collaborator factory;
//! - [`config`]: configuration structs.

mod builder;
mod config;
mod context;
mod inflight;
mod registry;
mod shutdown;
mod signals;

pub use builder::{ContextBuilder, ContextFactory, DefaultFactory};
pub use config::{ContextConfig, PipelineConfig, PoolProfile, RejectionPolicy, ShutdownConfig};
pub use context::{Context, ContextState, ContextStatus, StartupHook};
pub use inflight::{InflightExchange, InflightTracker};
pub use registry::{Op, WorkflowRegistry};
pub use shutdown::{ShutdownCoordinator, ShutdownFlag, ShutdownOutcome};
pub use signals::wait_for_shutdown_signal;
