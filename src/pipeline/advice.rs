//! # Advice: before/after hooks around a processor.
//!
//! An [`Advice`] runs `before` on the way in and `after` on the way out of a
//! pipeline. `before` may return a state value that is handed back to the same
//! advice's `after` for the same exchange.
//!
//! ## Rules
//! - Advices run in ascending [`priority`](Advice::priority); `after` hooks run in reverse.
//! - Stateless advices (`has_state() == false`) get no state slot and always see `None`.
//! - A failing `before` marks the exchange failed; later advices and the processor are skipped.

use std::any::Any;
use std::sync::Arc;

use crate::error::ProcessError;
use crate::workflow::Exchange;

/// Opaque per-exchange state produced by `before` and consumed by `after`.
pub type AdviceState = Box<dyn Any + Send>;

pub type AdviceRef = Arc<dyn Advice>;

/// Priorities of the built-in advices. User advices default to `0`.
pub mod priority {
    pub const UNIT_OF_WORK: i32 = -500;
    pub const INFLIGHT: i32 = -400;
    pub const WORKFLOW_POLICY: i32 = -300;
    pub const MESSAGE_HISTORY: i32 = -200;
    pub const TRACING: i32 = -100;
    pub const USER: i32 = 0;
}

/// Cross-cutting hook pair around message processing.
pub trait Advice: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        priority::USER
    }

    /// Whether `before` produces state that `after` needs.
    fn has_state(&self) -> bool {
        true
    }

    fn before(&self, exchange: &mut Exchange) -> Result<Option<AdviceState>, ProcessError>;

    fn after(&self, _exchange: &mut Exchange, _state: Option<AdviceState>) -> Result<(), ProcessError> {
        Ok(())
    }
}
