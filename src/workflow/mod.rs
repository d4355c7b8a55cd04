//! Workflow model: definitions, services, endpoints and exchanges.
//!
//! ## Contents
//! - [`Workflow`], [`WorkflowBuilder`] static workflow description
//! - [`WorkflowService`] running form owned by the registry, [`WorkflowStartupOrder`] its rank
//! - [`Service`], [`ShutdownAware`], [`ShutdownPrepared`] service capabilities
//! - [`Endpoint`], [`EndpointResolver`], [`StaticResolver`], [`EndpointRegistry`]
//! - [`Exchange`] message container
//! - [`ServiceStatus`] workflow service status

mod definition;
mod endpoint;
mod exchange;
mod runtime;
mod service;
mod status;

pub use definition::{
    ShutdownRunningTask, ShutdownWorkflow, Workflow, WorkflowBuilder, WorkflowController,
};
pub use endpoint::{Endpoint, EndpointRef, EndpointRegistry, EndpointResolver, StaticResolver};
pub use exchange::{Exchange, FORCED_SHUTDOWN_PROPERTY, HistoryEntry};
pub use runtime::{WorkflowService, WorkflowStartupOrder};
pub use service::{Service, ShutdownAware, ShutdownPrepared};
pub use status::ServiceStatus;
