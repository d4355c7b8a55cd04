//! # Built-in advices.
//!
//! | advice                  | priority          | concern                                           |
//! |-------------------------|-------------------|---------------------------------------------------|
//! | [`UnitOfWorkAdvice`]    | `UNIT_OF_WORK`    | claims the origin, runs on-completion hooks       |
//! | [`InflightAdvice`]      | `INFLIGHT`        | registers the exchange with the inflight tracker  |
//! | [`WorkflowPolicyAdvice`]| `WORKFLOW_POLICY` | notifies workflow policies on begin/done          |
//! | [`MessageHistoryAdvice`]| `MESSAGE_HISTORY` | appends a history entry with the time spent       |
//! | [`TracingAdvice`]       | `TRACING`         | emits a `tracing` record per exchange             |

use std::sync::Arc;
use std::time::Instant;

use super::advice::{Advice, AdviceState, priority};
use crate::core::InflightTracker;
use crate::error::ProcessError;
use crate::workflow::{Exchange, HistoryEntry};

/// Callbacks invoked around every exchange of a workflow.
pub trait WorkflowPolicy: Send + Sync + 'static {
    fn on_exchange_begin(&self, _workflow: &str, _exchange: &mut Exchange) {}

    fn on_exchange_done(&self, _workflow: &str, _exchange: &Exchange) {}
}

/// Claims the exchange for the workflow it entered first and runs its
/// on-completion hooks when that workflow is done with it.
pub struct UnitOfWorkAdvice {
    workflow: Arc<str>,
}

impl UnitOfWorkAdvice {
    pub fn new(workflow: Arc<str>) -> Self {
        Self { workflow }
    }
}

impl Advice for UnitOfWorkAdvice {
    fn name(&self) -> &str {
        "unit-of-work"
    }

    fn priority(&self) -> i32 {
        priority::UNIT_OF_WORK
    }

    fn before(&self, exchange: &mut Exchange) -> Result<Option<AdviceState>, ProcessError> {
        let owner = exchange.claim_origin(&self.workflow);
        Ok(Some(Box::new(owner)))
    }

    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> Result<(), ProcessError> {
        let owner = state
            .and_then(|s| s.downcast::<bool>().ok())
            .is_some_and(|b| *b);
        if owner {
            for hook in exchange.take_on_completion() {
                hook(exchange);
            }
        }
        Ok(())
    }
}

/// Tracks the exchange as in-flight while it is inside the workflow.
pub struct InflightAdvice {
    tracker: Arc<InflightTracker>,
    workflow: Arc<str>,
}

impl InflightAdvice {
    pub fn new(tracker: Arc<InflightTracker>, workflow: Arc<str>) -> Self {
        Self { tracker, workflow }
    }
}

impl Advice for InflightAdvice {
    fn name(&self) -> &str {
        "inflight"
    }

    fn priority(&self) -> i32 {
        priority::INFLIGHT
    }

    fn has_state(&self) -> bool {
        false
    }

    fn before(&self, exchange: &mut Exchange) -> Result<Option<AdviceState>, ProcessError> {
        self.tracker.add(exchange, &self.workflow);
        Ok(None)
    }

    fn after(&self, exchange: &mut Exchange, _state: Option<AdviceState>) -> Result<(), ProcessError> {
        self.tracker.remove(exchange.id(), &self.workflow);
        Ok(())
    }
}

/// Notifies the workflow's policies.
pub struct WorkflowPolicyAdvice {
    workflow: Arc<str>,
    policies: Vec<Arc<dyn WorkflowPolicy>>,
}

impl WorkflowPolicyAdvice {
    pub fn new(workflow: Arc<str>, policies: Vec<Arc<dyn WorkflowPolicy>>) -> Self {
        Self { workflow, policies }
    }
}

impl Advice for WorkflowPolicyAdvice {
    fn name(&self) -> &str {
        "workflow-policy"
    }

    fn priority(&self) -> i32 {
        priority::WORKFLOW_POLICY
    }

    fn has_state(&self) -> bool {
        false
    }

    fn before(&self, exchange: &mut Exchange) -> Result<Option<AdviceState>, ProcessError> {
        for policy in &self.policies {
            policy.on_exchange_begin(&self.workflow, exchange);
        }
        Ok(None)
    }

    fn after(&self, exchange: &mut Exchange, _state: Option<AdviceState>) -> Result<(), ProcessError> {
        for policy in &self.policies {
            policy.on_exchange_done(&self.workflow, exchange);
        }
        Ok(())
    }
}

/// Appends a [`HistoryEntry`] for the workflow once the exchange leaves it.
pub struct MessageHistoryAdvice {
    workflow: Arc<str>,
    node: Arc<str>,
}

impl MessageHistoryAdvice {
    pub fn new(workflow: Arc<str>, node: impl Into<Arc<str>>) -> Self {
        Self {
            workflow,
            node: node.into(),
        }
    }
}

impl Advice for MessageHistoryAdvice {
    fn name(&self) -> &str {
        "message-history"
    }

    fn priority(&self) -> i32 {
        priority::MESSAGE_HISTORY
    }

    fn before(&self, exchange: &mut Exchange) -> Result<Option<AdviceState>, ProcessError> {
        exchange.set_node_id(Arc::clone(&self.node));
        Ok(Some(Box::new(Instant::now())))
    }

    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> Result<(), ProcessError> {
        let started = state
            .and_then(|s| s.downcast::<Instant>().ok())
            .map(|b| *b);
        exchange.push_history(HistoryEntry {
            workflow: Arc::clone(&self.workflow),
            node: Arc::clone(&self.node),
            elapsed: started.map(|t| t.elapsed()).unwrap_or_default(),
        });
        Ok(())
    }
}

/// Emits one debug record when an exchange enters and one when it leaves.
pub struct TracingAdvice {
    workflow: Arc<str>,
}

impl TracingAdvice {
    pub fn new(workflow: Arc<str>) -> Self {
        Self { workflow }
    }
}

impl Advice for TracingAdvice {
    fn name(&self) -> &str {
        "tracing"
    }

    fn priority(&self) -> i32 {
        priority::TRACING
    }

    fn before(&self, exchange: &mut Exchange) -> Result<Option<AdviceState>, ProcessError> {
        tracing::debug!(workflow = %self.workflow, exchange = %exchange.id(), "exchange received");
        Ok(Some(Box::new(Instant::now())))
    }

    fn after(&self, exchange: &mut Exchange, state: Option<AdviceState>) -> Result<(), ProcessError> {
        let elapsed = state
            .and_then(|s| s.downcast::<Instant>().ok())
            .map(|t| t.elapsed());
        match exchange.error() {
            Some(err) => tracing::debug!(workflow = %self.workflow, exchange = %exchange.id(), ?elapsed, error = %err, "exchange failed"),
            None => tracing::debug!(workflow = %self.workflow, exchange = %exchange.id(), ?elapsed, "exchange completed"),
        }
        Ok(())
    }
}
