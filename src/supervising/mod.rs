//! Supervising controller: backoff restarts of failing workflows.
//!
//! Enabled with [`ContextBuilder::with_supervising`](crate::ContextBuilder::with_supervising).
//!
//! ## Contents
//! - [`SupervisingController`] owner of supervised workflows and their restart loops
//! - [`SupervisingConfig`] patterns, initial delay, restart policy and health switches
//! - [`WorkflowFilter`] include/exclude matching of workflow ids
//! - [`HealthSink`] / [`HealthState`] receivers of unhealthy/healthy transitions
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use flowvisor::{BackoffPolicy, ContextBuilder, ContextConfig, SupervisingConfig};
//!
//! # async fn demo() {
//! let supervising = SupervisingConfig {
//!     exclude: vec!["audit-*".into()],
//!     backoff: BackoffPolicy::fixed(Duration::from_secs(5), 10),
//!     ..SupervisingConfig::default()
//! };
//! let ctx = ContextBuilder::new(ContextConfig::default())
//!     .with_supervising(supervising)
//!     .build();
//! ctx.start().await.unwrap();
//! # }
//! ```

mod config;
mod controller;
mod health;
mod pattern;

pub use config::SupervisingConfig;
pub use controller::SupervisingController;
pub use health::{HealthSink, HealthState};
pub use pattern::WorkflowFilter;
