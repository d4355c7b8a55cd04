//! # Exchange: one message travelling through a workflow.
//!
//! An [`Exchange`] carries a JSON body, headers, properties, the error (if any)
//! raised while processing it, a message history and on-completion hooks run by
//! the unit-of-work advice when the exchange leaves its originating workflow.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::ProcessError;

static EXCHANGE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Property set on a workflow (and checked by its pipeline) once forced shutdown began.
pub const FORCED_SHUTDOWN_PROPERTY: &str = "flowvisor.forced-shutdown";

/// One step recorded by the message-history advice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub workflow: Arc<str>,
    pub node: Arc<str>,
    pub elapsed: Duration,
}

type OnCompletion = Box<dyn FnOnce(&Exchange) + Send + 'static>;

/// Message container processed by an advice pipeline.
pub struct Exchange {
    id: Arc<str>,
    from_workflow: Option<Arc<str>>,
    node_id: Option<Arc<str>>,
    headers: HashMap<String, Value>,
    properties: HashMap<String, Value>,
    body: Value,
    error: Option<ProcessError>,
    transacted: bool,
    history: Vec<HistoryEntry>,
    on_completion: Vec<OnCompletion>,
    created: Instant,
}

impl Exchange {
    /// Creates an exchange with a fresh id.
    pub fn new(body: impl Into<Value>) -> Self {
        let n = EXCHANGE_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("ex-{n:08}").into(),
            from_workflow: None,
            node_id: None,
            headers: HashMap::new(),
            properties: HashMap::new(),
            body: body.into(),
            error: None,
            transacted: false,
            history: Vec::new(),
            on_completion: Vec::new(),
            created: Instant::now(),
        }
    }

    /// Marks the exchange as transacted: pipelines run it synchronously.
    pub fn transacted(mut self) -> Self {
        self.transacted = true;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    /// Workflow the exchange entered first.
    pub fn from_workflow(&self) -> Option<&Arc<str>> {
        self.from_workflow.as_ref()
    }

    /// Sets the originating workflow unless already set. Returns `true` when set now.
    pub fn claim_origin(&mut self, workflow: &Arc<str>) -> bool {
        if self.from_workflow.is_some() {
            return false;
        }
        self.from_workflow = Some(Arc::clone(workflow));
        true
    }

    /// Node currently processing the exchange.
    pub fn node_id(&self) -> Option<&Arc<str>> {
        self.node_id.as_ref()
    }

    pub fn set_node_id(&mut self, node: impl Into<Arc<str>>) {
        self.node_id = Some(node.into());
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.body = body.into();
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn error(&self) -> Option<&ProcessError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Records a failure; the first recorded error wins.
    pub fn set_error(&mut self, err: ProcessError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn take_error(&mut self) -> Option<ProcessError> {
        self.error.take()
    }

    pub fn is_transacted(&self) -> bool {
        self.transacted
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub(crate) fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Registers a hook run once the originating workflow is done with the exchange.
    pub fn on_completion(&mut self, f: impl FnOnce(&Exchange) + Send + 'static) {
        self.on_completion.push(Box::new(f));
    }

    pub(crate) fn take_on_completion(&mut self) -> Vec<OnCompletion> {
        std::mem::take(&mut self.on_completion)
    }

    /// Time since the exchange was created.
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("from_workflow", &self.from_workflow)
            .field("body", &self.body)
            .field("error", &self.error)
            .field("transacted", &self.transacted)
            .finish_non_exhaustive()
    }
}
