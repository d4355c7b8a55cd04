//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Context`, `WorkflowRegistry`, `ShutdownCoordinator`,
//!   `BackoffScheduler`, `SupervisingController`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the context event listener, which fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
