//! # Demo: supervised_restart
//!
//! A workflow whose consumer refuses to start twice is restarted by the
//! supervising controller until it comes up, then handles one message.
//!
//! ## Flow
//! ```text
//! ctx.start()
//!   ├─► start "orders" → Err (attempt 0) → WorkflowRestartFailed
//!   ├─► BackoffScheduled{delay=200ms} → WorkflowRestarting(1) → Err
//!   ├─► BackoffScheduled{delay=200ms} → WorkflowRestarting(2) → Ok
//!   └─► consumer.send({"id": 1}) → processor
//! ctx.stop()
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example supervised_restart
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flowvisor::{
    BackoffPolicy, ContextBuilder, ContextConfig, Endpoint, Exchange, LogWriter, ProcessorFn, ProcessorRef,
    Service, ServiceError, StaticResolver, Subscribe, SupervisingConfig, Workflow, process_async,
};
use parking_lot::Mutex;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Endpoint whose consumer fails its first `failures` starts.
struct FlakyEndpoint {
    failures: AtomicU32,
    processor: Mutex<Option<ProcessorRef>>,
}

struct FlakyConsumer {
    endpoint: Arc<FlakyEndpoint>,
}

#[async_trait]
impl Service for FlakyConsumer {
    fn name(&self) -> &str {
        "flaky-consumer"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let left = self.endpoint.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.endpoint.failures.store(left - 1, Ordering::SeqCst);
            return Err(ServiceError::failed("broker not reachable"));
        }
        println!("[flaky] consumer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        println!("[flaky] consumer stopped");
        Ok(())
    }
}

struct FlakyHandle(Arc<FlakyEndpoint>);

#[async_trait]
impl Service for FlakyHandle {
    fn name(&self) -> &str {
        "flaky:orders"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

impl Endpoint for FlakyHandle {
    fn uri(&self) -> &str {
        "flaky:orders"
    }

    fn create_consumer(&self, processor: ProcessorRef) -> Result<Arc<dyn Service>, ServiceError> {
        *self.0.processor.lock() = Some(processor);
        Ok(Arc::new(FlakyConsumer {
            endpoint: Arc::clone(&self.0),
        }))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let endpoint = Arc::new(FlakyEndpoint {
        failures: AtomicU32::new(2),
        processor: Mutex::new(None),
    });
    let resolver = StaticResolver::new().with(Arc::new(FlakyHandle(Arc::clone(&endpoint))));

    let supervising = SupervisingConfig {
        backoff: BackoffPolicy::fixed(Duration::from_millis(200), 5),
        ..SupervisingConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];

    let ctx = ContextBuilder::new(ContextConfig::default())
        .with_subscribers(subs)
        .with_resolver(Arc::new(resolver))
        .with_supervising(supervising)
        .with_workflow(
            Workflow::builder("orders")
                .from("flaky:orders")
                .build(Arc::new(ProcessorFn::new(|ex: &mut Exchange| {
                    println!("[orders] processing {}", ex.body());
                    Ok(())
                }))),
        )
        .build();

    ctx.start().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("[demo] orders is {:?}", ctx.workflow_status("orders"));

    let processor = endpoint.processor.lock().clone();
    if let Some(processor) = processor {
        let done = process_async(&*processor, Exchange::new(json!({"id": 1}))).await?;
        println!("[demo] exchange {} failed={}", done.id(), done.is_failed());
    }

    ctx.stop().await?;
    Ok(())
}
