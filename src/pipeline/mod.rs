//! Message processing: processors, advices and the pooled advice pipeline.
//!
//! ## Contents
//! - [`Processor`], [`AsyncCallback`] callback-based processing contract (sync or async completion)
//! - [`ProcessorFn`], [`AsyncProcessorFn`] closure adapters
//! - [`Advice`] before/after hook pair with optional per-exchange state
//! - [`AdvicePipeline`] ordered advice chain around a processor, with continuation pooling
//! - built-in advices: unit of work, inflight tracking, workflow policies, message history, tracing
//!
//! ## Wiring
//! ```text
//! consumer ──► AdvicePipeline ──► [unit-of-work ─► inflight ─► policy ─► history ─► tracing ─► user...]
//!                                                                                       │
//!                                                                  workflow processor ◄─┘
//! ```

mod advice;
mod advices;
mod internal;
mod pool;
mod processor;

pub use advice::{Advice, AdviceRef, AdviceState, priority};
pub use advices::{
    InflightAdvice, MessageHistoryAdvice, TracingAdvice, UnitOfWorkAdvice, WorkflowPolicy,
    WorkflowPolicyAdvice,
};
pub use internal::AdvicePipeline;
pub use pool::{ContinuationPool, PoolStats};
pub use processor::{AsyncCallback, AsyncProcessorFn, Processor, ProcessorFn, ProcessorRef, process_async};
