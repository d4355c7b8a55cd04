//! # Advice pipeline.
//!
//! [`AdvicePipeline`] wraps a workflow's processor with its ordered advices and is
//! the processor handed to the workflow's consumer.
//!
//! ```text
//! process(ex, cb)
//!   ├─ forced shutdown?  → ex.error = Rejected; cb.done(ex, true)      (no advice runs)
//!   ├─ continuation = pool.checkout(); continuation.callback = cb
//!   ├─ for advice in advices:   state[i] = advice.before(ex)?
//!   │     └─ Err → ex.error; after() for advices already run; cb.done(ex, true)
//!   ├─ transacted?  → processor must complete inline; late completion fails the exchange
//!   └─ processor.process(ex, done)
//!                         └─ done: after() in reverse → cb.done(ex, sync) → pool.release
//! ```
//!
//! ## Rules
//! - `after` runs exactly for the advices whose `before` succeeded, in reverse order.
//! - A failing `after` is logged and recorded on the exchange; remaining `after` hooks still run.
//! - The original callback is invoked before the continuation returns to the pool.
//! - Transacted exchanges never block the calling worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::advice::AdviceRef;
use super::pool::{Continuation, ContinuationPool, PoolStats};
use super::processor::{AsyncCallback, Processor, ProcessorRef, process_async};
use crate::core::{PipelineConfig, ShutdownFlag};
use crate::error::ProcessError;
use crate::workflow::Exchange;

/// Ordered advice chain around a processor.
pub struct AdvicePipeline {
    inner: Arc<Inner>,
}

struct Inner {
    workflow: Arc<str>,
    advices: Vec<AdviceRef>,
    slots: Vec<Option<usize>>,
    processor: ProcessorRef,
    pool: ContinuationPool,
    global_forced: ShutdownFlag,
    forced: AtomicBool,
}

impl AdvicePipeline {
    /// Builds a pipeline; advices are stably sorted by priority.
    pub fn new(
        workflow: Arc<str>,
        processor: ProcessorRef,
        mut advices: Vec<AdviceRef>,
        cfg: &PipelineConfig,
        global_forced: ShutdownFlag,
    ) -> Self {
        advices.sort_by_key(|a| a.priority());

        let mut next_slot = 0;
        let slots = advices
            .iter()
            .map(|a| {
                a.has_state().then(|| {
                    next_slot += 1;
                    next_slot - 1
                })
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                workflow,
                pool: ContinuationPool::new(next_slot, cfg.pool_capacity, cfg.pooled),
                advices,
                slots,
                processor,
                global_forced,
                forced: AtomicBool::new(false),
            }),
        }
    }

    pub fn workflow_id(&self) -> &Arc<str> {
        &self.inner.workflow
    }

    /// Advice names in execution order.
    pub fn advice_names(&self) -> Vec<String> {
        self.inner.advices.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Rejects every new exchange for this workflow.
    pub fn mark_forced(&self) {
        self.inner.forced.store(true, Ordering::Release);
    }

    pub fn clear_forced(&self) {
        self.inner.forced.store(false, Ordering::Release);
    }

    pub fn is_forced(&self) -> bool {
        self.inner.is_forced()
    }

    /// Releases pooled continuations.
    pub fn clear_pool(&self) {
        self.inner.pool.clear();
    }

    /// Processes one exchange and awaits completion.
    pub async fn process_async(&self, exchange: Exchange) -> Result<Exchange, ProcessError> {
        process_async(self, exchange).await
    }
}

impl Processor for AdvicePipeline {
    fn process(&self, mut exchange: Exchange, callback: AsyncCallback) -> bool {
        let inner = &self.inner;
        if inner.is_forced() {
            tracing::debug!(workflow = %inner.workflow, exchange = %exchange.id(), "rejecting exchange during forced shutdown");
            exchange.set_error(ProcessError::Rejected {
                reason: format!("workflow {} is shutting down", inner.workflow),
            });
            callback.done(exchange, true);
            return true;
        }

        let mut cont = inner.pool.checkout();
        cont.callback = Some(callback);

        for (i, advice) in inner.advices.iter().enumerate() {
            match advice.before(&mut exchange) {
                Ok(state) => {
                    if let Some(slot) = inner.slots[i] {
                        cont.states[slot] = state;
                    }
                    cont.ran = i + 1;
                }
                Err(err) => {
                    tracing::debug!(workflow = %inner.workflow, advice = advice.name(), error = %err, "advice before hook failed");
                    exchange.set_error(err);
                    inner.complete(cont, exchange, true);
                    return true;
                }
            }
        }

        if exchange.is_transacted() {
            return inner.process_transacted(cont, exchange);
        }

        let done_inner = Arc::clone(inner);
        inner.processor.process(
            exchange,
            AsyncCallback::new(move |ex, done_sync| done_inner.complete(cont, ex, done_sync)),
        )
    }
}

struct Transacted {
    inline: bool,
    cont: Option<Continuation>,
    exchange: Option<Exchange>,
}

impl Inner {
    fn is_forced(&self) -> bool {
        self.global_forced.is_forced() || self.forced.load(Ordering::Acquire)
    }

    /// Runs the processor expecting completion before `process` returns.
    ///
    /// A processor that completes later fails the exchange; the advices still unwind.
    fn process_transacted(self: &Arc<Self>, cont: Continuation, exchange: Exchange) -> bool {
        let slot = Arc::new(Mutex::new(Transacted {
            inline: true,
            cont: Some(cont),
            exchange: None,
        }));

        let late = Arc::clone(&slot);
        let late_inner = Arc::clone(self);
        self.processor.process(
            exchange,
            AsyncCallback::new(move |mut ex, _| {
                let mut tx = late.lock();
                if tx.inline {
                    tx.exchange = Some(ex);
                    return;
                }
                let Some(cont) = tx.cont.take() else { return };
                drop(tx);
                ex.set_error(ProcessError::failed(
                    "transacted exchange did not complete synchronously",
                ));
                late_inner.complete(cont, ex, false);
            }),
        );

        let mut tx = slot.lock();
        tx.inline = false;
        match (tx.exchange.take(), tx.cont.take()) {
            (Some(ex), Some(cont)) => {
                drop(tx);
                self.complete(cont, ex, true);
                true
            }
            (_, cont) => {
                tx.cont = cont;
                tracing::warn!(workflow = %self.workflow, "transacted exchange left the calling worker");
                false
            }
        }
    }

    fn complete(&self, mut cont: Continuation, mut exchange: Exchange, done_sync: bool) {
        for i in (0..cont.ran).rev() {
            let advice = &self.advices[i];
            let state = self.slots[i].and_then(|slot| cont.states[slot].take());
            if let Err(err) = advice.after(&mut exchange, state) {
                tracing::warn!(workflow = %self.workflow, advice = advice.name(), error = %err, "advice after hook failed");
                exchange.set_error(err);
            }
        }
        if let Some(callback) = cont.callback.take() {
            callback.done(exchange, done_sync);
        }
        self.pool.release(cont);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Advice, AdviceState, AsyncProcessorFn, ProcessorFn};
    use crate::testing::{Journal, RecordingAdvice};
    use serde_json::json;

    fn pipeline(advices: Vec<AdviceRef>, processor: ProcessorRef, flag: ShutdownFlag) -> AdvicePipeline {
        AdvicePipeline::new("wf".into(), processor, advices, &PipelineConfig::default(), flag)
    }

    fn noop() -> ProcessorRef {
        Arc::new(ProcessorFn::new(|_ex: &mut Exchange| Ok(())))
    }

    #[tokio::test]
    async fn test_after_hooks_run_in_reverse_with_their_state() {
        let journal = Journal::default();
        let p = pipeline(
            vec![
                Arc::new(RecordingAdvice::new("b", 20, &journal)),
                Arc::new(RecordingAdvice::new("a", 10, &journal)),
                Arc::new(RecordingAdvice::new("c", 30, &journal).stateless()),
            ],
            noop(),
            ShutdownFlag::default(),
        );

        let ex = p.process_async(Exchange::new(json!(null))).await.unwrap();
        assert!(!ex.is_failed());
        assert_eq!(
            journal.entries(),
            vec!["before:a", "before:b", "before:c", "after:c:none", "after:b:b", "after:a:a"]
        );
    }

    #[tokio::test]
    async fn test_before_failure_unwinds_only_advices_that_ran() {
        let journal = Journal::default();
        let processed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&processed);
        let p = pipeline(
            vec![
                Arc::new(RecordingAdvice::new("a", 1, &journal)),
                Arc::new(RecordingAdvice::new("b", 2, &journal).failing_before()),
                Arc::new(RecordingAdvice::new("c", 3, &journal)),
            ],
            Arc::new(ProcessorFn::new(move |_ex: &mut Exchange| {
                seen.store(true, Ordering::SeqCst);
                Ok(())
            })),
            ShutdownFlag::default(),
        );

        let (tx, rx) = std::sync::mpsc::channel();
        let sync = p.process(
            Exchange::new(json!(null)),
            AsyncCallback::new(move |ex, done_sync| {
                let _ = tx.send((ex.error().cloned(), done_sync));
            }),
        );

        assert!(sync);
        let (err, done_sync) = rx.recv().unwrap();
        assert!(done_sync);
        assert!(matches!(err, Some(ProcessError::Advice { .. })));
        assert!(!processed.load(Ordering::SeqCst));
        assert_eq!(journal.entries(), vec!["before:a", "before:b", "after:a:a"]);
    }

    #[tokio::test]
    async fn test_forced_shutdown_rejects_without_running_advices() {
        let journal = Journal::default();
        let flag = ShutdownFlag::default();
        let p = pipeline(
            vec![Arc::new(RecordingAdvice::new("a", 0, &journal))],
            noop(),
            flag.clone(),
        );

        flag.force();
        let ex = p.process_async(Exchange::new(json!(null))).await.unwrap();
        assert!(ex.error().is_some_and(ProcessError::is_rejection));
        assert!(journal.entries().is_empty());

        flag.reset();
        p.mark_forced();
        let ex = p.process_async(Exchange::new(json!(null))).await.unwrap();
        assert!(ex.error().is_some_and(ProcessError::is_rejection));
    }

    #[tokio::test]
    async fn test_async_processor_completes_through_callback() {
        let journal = Journal::default();
        let p = pipeline(
            vec![Arc::new(RecordingAdvice::new("a", 0, &journal))],
            Arc::new(AsyncProcessorFn::new(|mut ex: Exchange| async move {
                tokio::task::yield_now().await;
                ex.set_body(json!("async"));
                ex
            })),
            ShutdownFlag::default(),
        );

        let ex = p.process_async(Exchange::new(json!(null))).await.unwrap();
        assert_eq!(ex.body(), &json!("async"));
        assert_eq!(journal.entries(), vec!["before:a", "after:a:a"]);
    }

    #[tokio::test]
    async fn test_transacted_exchange_completes_inline() {
        let journal = Journal::default();
        let p = pipeline(
            vec![Arc::new(RecordingAdvice::new("a", 0, &journal))],
            Arc::new(ProcessorFn::new(|ex: &mut Exchange| {
                ex.set_header("tx", true);
                Ok(())
            })),
            ShutdownFlag::default(),
        );

        let (tx, rx) = std::sync::mpsc::channel();
        let sync = p.process(
            Exchange::new(json!(null)).transacted(),
            AsyncCallback::new(move |ex, done_sync| {
                let _ = tx.send((ex.header("tx").cloned(), done_sync));
            }),
        );
        assert!(sync);
        assert_eq!(rx.try_recv().unwrap(), (Some(json!(true)), true));
        assert_eq!(journal.entries(), vec!["before:a", "after:a:a"]);
    }

    #[tokio::test]
    async fn test_transacted_exchange_completing_later_fails_and_unwinds() {
        let journal = Journal::default();
        let p = pipeline(
            vec![Arc::new(RecordingAdvice::new("a", 0, &journal))],
            Arc::new(AsyncProcessorFn::new(|ex: Exchange| async move {
                tokio::task::yield_now().await;
                ex
            })),
            ShutdownFlag::default(),
        );

        let ex = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            p.process_async(Exchange::new(json!(null)).transacted()),
        )
        .await
        .expect("transacted exchange must not block the worker")
        .unwrap();
        assert!(ex.is_failed());
        assert_eq!(journal.entries(), vec!["before:a", "after:a:a"]);
        assert_eq!(p.pool_stats().idle, 1);
    }

    #[tokio::test]
    async fn test_continuations_are_recycled() {
        let journal = Journal::default();
        let p = pipeline(
            vec![Arc::new(RecordingAdvice::new("a", 0, &journal))],
            noop(),
            ShutdownFlag::default(),
        );
        for _ in 0..5 {
            p.process_async(Exchange::new(json!(null))).await.unwrap();
        }
        let stats = p.pool_stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 4);
        assert_eq!(stats.idle, 1);
    }

    struct FailingAfter;

    impl Advice for FailingAfter {
        fn name(&self) -> &str {
            "failing-after"
        }
        fn before(&self, _ex: &mut Exchange) -> Result<Option<AdviceState>, ProcessError> {
            Ok(None)
        }
        fn after(&self, _ex: &mut Exchange, _s: Option<AdviceState>) -> Result<(), ProcessError> {
            Err(ProcessError::failed("after exploded"))
        }
    }

    #[tokio::test]
    async fn test_failing_after_does_not_skip_outer_advices() {
        let journal = Journal::default();
        let p = pipeline(
            vec![
                Arc::new(RecordingAdvice::new("outer", -1, &journal)),
                Arc::new(FailingAfter),
            ],
            noop(),
            ShutdownFlag::default(),
        );
        let ex = p.process_async(Exchange::new(json!(null))).await.unwrap();
        assert_eq!(ex.error(), Some(&ProcessError::failed("after exploded")));
        assert_eq!(journal.entries(), vec!["before:outer", "after:outer:outer"]);
    }
}
