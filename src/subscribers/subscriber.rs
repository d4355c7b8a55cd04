//! # Event subscriber trait.
//!
//! [`Subscribe`] is the event-notification extension point: anything that wants to
//! observe context, workflow, shutdown or supervision events implements it and is
//! handed to [`ContextBuilder::with_subscribers`](crate::ContextBuilder::with_subscribers).
//!
//! ## Architecture
//! ```text
//! Bus ──► listener ──► SubscriberSet::emit(ev)
//!                        └─► per subscriber: try_send ──► worker ──► on_event(&ev)
//!                              ├─ full  → SubscriberOverflow
//!                              └─ panic → SubscriberPanicked
//! ```
//!
//! ## Rules
//! - Each subscriber owns one bounded queue and one worker; FIFO per subscriber.
//! - Overflow drops the event for that subscriber only and publishes `SubscriberOverflow`.
//! - A slow or panicking subscriber never blocks publishers or other subscribers.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use flowvisor::{Event, EventKind, Subscribe};
//!
//! struct ExhaustionAlerts;
//!
//! #[async_trait]
//! impl Subscribe for ExhaustionAlerts {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::WorkflowRestartExhausted) {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "exhaustion-alerts" }
//!     fn queue_capacity(&self) -> usize { 64 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; panics are caught but reported as events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event on the subscriber's dedicated worker.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events. Defaults to the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
