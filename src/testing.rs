//! Test doubles shared by the unit tests.
//!
//! Consumers and endpoints write what happens to them into a [`Journal`]:
//! `start:<name>`, `stop:<name>`, `suspend:<name>`, `resume:<name>`,
//! `start-failed:<name>`, `prepare:<name>:<suspend_only>:<forced>`,
//! `endpoint-start:<name>`, `endpoint-stop:<name>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::core::{InflightTracker, PipelineConfig, ShutdownFlag};
use crate::error::{ProcessError, ServiceError};
use crate::pipeline::{
    Advice, AdvicePipeline, AdviceRef, AdviceState, AsyncProcessorFn, InflightAdvice, ProcessorFn,
    ProcessorRef, process_async,
};
use crate::workflow::{
    Endpoint, EndpointRef, EndpointRegistry, EndpointResolver, Exchange, Service, ShutdownAware,
    ShutdownPrepared, ShutdownRunningTask, Workflow, WorkflowBuilder, WorkflowService,
};

#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Advice journaling `before:<name>` and `after:<name>:<state>`.
pub(crate) struct RecordingAdvice {
    name: String,
    priority: i32,
    stateful: bool,
    fail_before: bool,
    journal: Journal,
}

impl RecordingAdvice {
    pub fn new(name: &str, priority: i32, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            priority,
            stateful: true,
            fail_before: false,
            journal: journal.clone(),
        }
    }

    pub fn stateless(mut self) -> Self {
        self.stateful = false;
        self
    }

    pub fn failing_before(mut self) -> Self {
        self.fail_before = true;
        self
    }
}

impl Advice for RecordingAdvice {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn has_state(&self) -> bool {
        self.stateful
    }

    fn before(&self, _exchange: &mut Exchange) -> Result<Option<AdviceState>, ProcessError> {
        self.journal.push(format!("before:{}", self.name));
        if self.fail_before {
            return Err(ProcessError::Advice {
                advice: self.name.clone(),
                reason: "refused".to_string(),
            });
        }
        Ok(Some(Box::new(self.name.clone())))
    }

    fn after(&self, _exchange: &mut Exchange, state: Option<AdviceState>) -> Result<(), ProcessError> {
        let state = state
            .and_then(|s| s.downcast::<String>().ok())
            .map_or_else(|| "none".to_string(), |s| *s);
        self.journal.push(format!("after:{}:{}", self.name, state));
        Ok(())
    }
}

/// Behavior switches shared by an endpoint and the consumers it creates.
#[derive(Default)]
pub(crate) struct Knobs {
    suspendable: AtomicBool,
    aware: AtomicBool,
    defer: AtomicBool,
    pending: AtomicUsize,
    fail_starts: AtomicU32,
    fail_resolve: AtomicBool,
}

impl Knobs {
    pub fn set_suspendable(&self, v: bool) {
        self.suspendable.store(v, Ordering::SeqCst);
    }

    pub fn set_aware(&self, v: bool) {
        self.aware.store(v, Ordering::SeqCst);
    }

    pub fn set_defer(&self, v: bool) {
        self.defer.store(v, Ordering::SeqCst);
    }

    pub fn set_pending(&self, n: usize) {
        self.pending.store(n, Ordering::SeqCst);
    }

    /// Consumer start fails `n` more times; `u32::MAX` fails forever.
    pub fn fail_starts(&self, n: u32) {
        self.fail_starts.store(n, Ordering::SeqCst);
    }

    pub fn fail_resolve(&self, v: bool) {
        self.fail_resolve.store(v, Ordering::SeqCst);
    }

    fn take_start_failure(&self) -> bool {
        self.fail_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

pub(crate) struct TestConsumer {
    name: String,
    processor: ProcessorRef,
    knobs: Arc<Knobs>,
    journal: Journal,
}

impl TestConsumer {
    /// Feeds one exchange into the workflow and waits for it.
    pub async fn send(&self, body: impl Into<Value>) -> Result<Exchange, ProcessError> {
        process_async(&*self.processor, Exchange::new(body)).await
    }
}

#[async_trait]
impl Service for TestConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), ServiceError> {
        if self.knobs.take_start_failure() {
            self.journal.push(format!("start-failed:{}", self.name));
            return Err(ServiceError::failed(format!("{} refused to start", self.name)));
        }
        self.journal.push(format!("start:{}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.journal.push(format!("stop:{}", self.name));
        Ok(())
    }

    fn is_suspendable(&self) -> bool {
        self.knobs.suspendable.load(Ordering::SeqCst)
    }

    async fn suspend(&self) -> Result<(), ServiceError> {
        self.journal.push(format!("suspend:{}", self.name));
        Ok(())
    }

    async fn resume(&self) -> Result<(), ServiceError> {
        self.journal.push(format!("resume:{}", self.name));
        Ok(())
    }

    fn shutdown_aware(&self) -> Option<&dyn ShutdownAware> {
        self.knobs.aware.load(Ordering::SeqCst).then_some(self as &dyn ShutdownAware)
    }
}

impl ShutdownPrepared for TestConsumer {
    fn prepare_shutdown(&self, suspend_only: bool, forced: bool) {
        self.journal
            .push(format!("prepare:{}:{}:{}", self.name, suspend_only, forced));
    }
}

impl ShutdownAware for TestConsumer {
    fn defer_shutdown(&self, _running: ShutdownRunningTask) -> bool {
        self.knobs.defer.load(Ordering::SeqCst)
    }

    fn pending_exchanges(&self) -> usize {
        self.knobs.pending.load(Ordering::SeqCst)
    }
}

pub(crate) struct TestEndpoint {
    uri: String,
    name: String,
    knobs: Arc<Knobs>,
    journal: Journal,
    consumer: Mutex<Option<Arc<TestConsumer>>>,
}

#[async_trait]
impl Service for TestEndpoint {
    fn name(&self) -> &str {
        &self.uri
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.journal.push(format!("endpoint-start:{}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.journal.push(format!("endpoint-stop:{}", self.name));
        Ok(())
    }
}

impl Endpoint for TestEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn create_consumer(&self, processor: ProcessorRef) -> Result<Arc<dyn Service>, ServiceError> {
        let consumer = Arc::new(TestConsumer {
            name: self.name.clone(),
            processor,
            knobs: Arc::clone(&self.knobs),
            journal: self.journal.clone(),
        });
        *self.consumer.lock() = Some(Arc::clone(&consumer));
        Ok(consumer)
    }
}

/// Resolves `test:<name>` URIs, creating endpoints on first use.
pub(crate) struct TestResolver {
    journal: Journal,
    endpoints: DashMap<String, Arc<TestEndpoint>>,
}

impl TestResolver {
    pub fn new(journal: &Journal) -> Arc<Self> {
        init_tracing();
        Arc::new(Self {
            journal: journal.clone(),
            endpoints: DashMap::new(),
        })
    }

    fn endpoint(&self, name: &str) -> Arc<TestEndpoint> {
        let entry = self.endpoints.entry(name.to_string()).or_insert_with(|| {
            Arc::new(TestEndpoint {
                uri: format!("test:{name}"),
                name: name.to_string(),
                knobs: Arc::new(Knobs::default()),
                journal: self.journal.clone(),
                consumer: Mutex::new(None),
            })
        });
        Arc::clone(entry.value())
    }

    pub fn knobs(&self, name: &str) -> Arc<Knobs> {
        Arc::clone(&self.endpoint(name).knobs)
    }

    /// Last consumer created for `test:<name>`.
    pub fn consumer(&self, name: &str) -> Option<Arc<TestConsumer>> {
        self.endpoint(name).consumer.lock().clone()
    }
}

#[async_trait]
impl EndpointResolver for TestResolver {
    fn resolve(&self, uri: &str) -> Result<EndpointRef, ServiceError> {
        let Some(name) = uri.strip_prefix("test:") else {
            return Err(ServiceError::Unresolvable {
                uri: uri.to_string(),
                reason: "unknown scheme".to_string(),
            });
        };
        let endpoint = self.endpoint(name);
        if endpoint.knobs.fail_resolve.load(Ordering::SeqCst) {
            return Err(ServiceError::Unresolvable {
                uri: uri.to_string(),
                reason: "resolution refused".to_string(),
            });
        }
        Ok(endpoint)
    }
}

/// Processor that holds every exchange until the gate opens.
pub(crate) struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn new() -> Self {
        Self(Arc::new(watch::Sender::new(false)))
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    pub fn processor(&self) -> ProcessorRef {
        let tx = Arc::clone(&self.0);
        Arc::new(AsyncProcessorFn::new(move |ex: Exchange| {
            let mut rx = tx.subscribe();
            async move {
                let _ = rx.wait_for(|open| *open).await;
                ex
            }
        }))
    }
}

/// Installs a test-writer `tracing` subscriber once; filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn noop() -> ProcessorRef {
    Arc::new(ProcessorFn::new(|_ex: &mut Exchange| Ok(())))
}

/// Workflow builder consuming from `test:<id>`.
pub(crate) fn test_workflow(id: &str) -> WorkflowBuilder {
    Workflow::builder(id).from(format!("test:{id}"))
}

/// Standalone wiring for tests below the registry.
pub(crate) struct Harness {
    pub journal: Journal,
    pub resolver: Arc<TestResolver>,
    pub endpoints: EndpointRegistry,
    pub inflight: Arc<InflightTracker>,
    pub flag: ShutdownFlag,
    seq: AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::default();
        let resolver = TestResolver::new(&journal);
        Self {
            endpoints: EndpointRegistry::new(Arc::clone(&resolver) as Arc<dyn EndpointResolver>),
            journal,
            resolver,
            inflight: Arc::new(InflightTracker::new()),
            flag: ShutdownFlag::default(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn noop(&self) -> ProcessorRef {
        noop()
    }

    /// Wraps `workflow` with an inflight-tracking pipeline, warms it up and starts its consumer.
    pub async fn started(&self, workflow: Workflow, rank: i32) -> Arc<WorkflowService> {
        let workflow = Arc::new(workflow);
        let mut advices: Vec<AdviceRef> = vec![Arc::new(InflightAdvice::new(
            Arc::clone(&self.inflight),
            Arc::clone(workflow.id()),
        ))];
        advices.extend(workflow.advices().iter().cloned());
        let pipeline = Arc::new(AdvicePipeline::new(
            Arc::clone(workflow.id()),
            Arc::clone(workflow.processor()),
            advices,
            &PipelineConfig::default(),
            self.flag.clone(),
        ));
        let service = Arc::new(WorkflowService::new(
            workflow,
            pipeline,
            self.seq.fetch_add(1, Ordering::Relaxed),
        ));
        service.assign_rank(rank);
        service.warm_up(&self.endpoints).await.unwrap();
        service.start_consumer().await.unwrap();
        service
    }
}
