//! # Processors and completion callbacks.
//!
//! A [`Processor`] takes ownership of an [`Exchange`] and hands it back through an
//! [`AsyncCallback`] exactly once. `process` returns `true` when the callback was
//! already invoked before returning (synchronous completion) and `false` when it
//! will be invoked later from another task.
//!
//! ```text
//! caller ── process(ex, cb) ──► processor
//!                                 ├─ sync:  cb.done(ex, true);  return true
//!                                 └─ async: spawn { ...; cb.done(ex, false) }; return false
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::ProcessError;
use crate::workflow::Exchange;

/// One-shot completion callback receiving the exchange and whether completion was synchronous.
pub struct AsyncCallback(Box<dyn FnOnce(Exchange, bool) + Send + 'static>);

impl AsyncCallback {
    pub fn new(f: impl FnOnce(Exchange, bool) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Completes the exchange.
    pub fn done(self, exchange: Exchange, done_sync: bool) {
        (self.0)(exchange, done_sync)
    }
}

/// Message processing step.
///
/// Implementations must invoke the callback exactly once.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, exchange: Exchange, callback: AsyncCallback) -> bool;
}

pub type ProcessorRef = Arc<dyn Processor>;

/// Drives `processor` and awaits its completion.
pub async fn process_async(processor: &dyn Processor, exchange: Exchange) -> Result<Exchange, ProcessError> {
    let (tx, rx) = oneshot::channel();
    processor.process(
        exchange,
        AsyncCallback::new(move |ex, _| {
            let _ = tx.send(ex);
        }),
    );
    rx.await
        .map_err(|_| ProcessError::failed("processor dropped the completion callback"))
}

/// Synchronous processor built from a closure.
pub struct ProcessorFn<F> {
    f: F,
}

impl<F> ProcessorFn<F>
where
    F: Fn(&mut Exchange) -> Result<(), ProcessError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Processor for ProcessorFn<F>
where
    F: Fn(&mut Exchange) -> Result<(), ProcessError> + Send + Sync + 'static,
{
    fn process(&self, mut exchange: Exchange, callback: AsyncCallback) -> bool {
        if let Err(err) = (self.f)(&mut exchange) {
            exchange.set_error(err);
        }
        callback.done(exchange, true);
        true
    }
}

/// Asynchronous processor: the future runs on a spawned tokio task.
pub struct AsyncProcessorFn<F> {
    f: F,
}

impl<F, Fut> AsyncProcessorFn<F>
where
    F: Fn(Exchange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Exchange> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Processor for AsyncProcessorFn<F>
where
    F: Fn(Exchange) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Exchange> + Send + 'static,
{
    fn process(&self, exchange: Exchange, callback: AsyncCallback) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            let mut exchange = exchange;
            exchange.set_error(ProcessError::failed("no async runtime available"));
            callback.done(exchange, true);
            return true;
        };
        let fut = (self.f)(exchange);
        handle.spawn(async move {
            let exchange = fut.await;
            callback.done(exchange, false);
        });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sync_processor_completes_inline() {
        let p = ProcessorFn::new(|ex: &mut Exchange| {
            ex.set_body(json!("done"));
            Ok(())
        });
        let (tx, rx) = std::sync::mpsc::channel();
        let sync = p.process(
            Exchange::new(json!(null)),
            AsyncCallback::new(move |ex, done_sync| {
                let _ = tx.send((ex.body().clone(), done_sync));
            }),
        );
        assert!(sync);
        assert_eq!(rx.recv().unwrap(), (json!("done"), true));
    }

    #[tokio::test]
    async fn test_async_processor_completes_later() {
        let p = AsyncProcessorFn::new(|mut ex: Exchange| async move {
            tokio::task::yield_now().await;
            ex.set_header("seen", true);
            ex
        });
        let ex = process_async(&p, Exchange::new(json!(1))).await.unwrap();
        assert_eq!(ex.header("seen"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_errors_are_attached_to_exchange() {
        let p = ProcessorFn::new(|_ex: &mut Exchange| Err(ProcessError::failed("bad payload")));
        let ex = process_async(&p, Exchange::new(json!({}))).await.unwrap();
        assert_eq!(ex.error().map(ProcessError::as_label), Some("exchange_failed"));
    }
}
