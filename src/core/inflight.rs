//! # In-flight exchange tracker.
//!
//! [`InflightTracker`] counts exchanges currently inside each workflow. The
//! inflight advice adds an exchange on entry and removes it on exit; the shutdown
//! coordinator polls the per-workflow counts while draining.
//!
//! ## Rules
//! - Each workflow counts its own visits; an exchange handed on to another
//!   workflow stays counted at the first one until that one removes it.
//! - `remove` of an unknown exchange or workflow is a no-op.
//! - Counts never go negative; a workflow entry disappears when its count reaches zero.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::workflow::Exchange;

/// Snapshot of one in-flight exchange.
#[derive(Debug, Clone)]
pub struct InflightExchange {
    pub exchange_id: Arc<str>,
    pub from_workflow: Option<Arc<str>>,
    pub at_workflow: Arc<str>,
    pub node_id: Option<Arc<str>>,
    pub since: Instant,
}

impl InflightExchange {
    pub fn elapsed(&self) -> Duration {
        self.since.elapsed()
    }
}

#[derive(Default)]
pub struct InflightTracker {
    // one record per workflow the exchange is currently inside, innermost last
    records: DashMap<Arc<str>, Vec<InflightExchange>>,
    counts: DashMap<Arc<str>, usize>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `exchange` as in flight at `workflow`.
    pub fn add(&self, exchange: &Exchange, workflow: &Arc<str>) {
        let record = InflightExchange {
            exchange_id: Arc::clone(exchange.id()),
            from_workflow: exchange.from_workflow().cloned(),
            at_workflow: Arc::clone(workflow),
            node_id: exchange.node_id().cloned(),
            since: Instant::now(),
        };
        self.records
            .entry(Arc::clone(exchange.id()))
            .or_default()
            .push(record);
        *self.counts.entry(Arc::clone(workflow)).or_insert(0) += 1;
    }

    /// Forgets the innermost visit of `exchange_id` at `workflow`.
    pub fn remove(&self, exchange_id: &str, workflow: &str) {
        let removed = match self.records.get_mut(exchange_id) {
            Some(mut visits) => match visits.iter().rposition(|r| &*r.at_workflow == workflow) {
                Some(pos) => {
                    visits.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };
        if !removed {
            return;
        }
        self.records.remove_if(exchange_id, |_, visits| visits.is_empty());
        self.decrement(workflow);
    }

    /// Updates the node currently processing `exchange_id`.
    pub fn update_node(&self, exchange_id: &str, node: impl Into<Arc<str>>) {
        if let Some(mut visits) = self.records.get_mut(exchange_id) {
            if let Some(record) = visits.last_mut() {
                record.node_id = Some(node.into());
            }
        }
    }

    /// Distinct exchanges in flight.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// In-flight exchanges at `workflow`.
    pub fn size_of(&self, workflow: &str) -> usize {
        self.counts.get(workflow).map(|c| *c).unwrap_or(0)
    }

    /// Oldest-first snapshot, optionally filtered by workflow; `limit = 0` means no limit.
    ///
    /// An exchange inside several workflows appears once per workflow.
    pub fn browse(&self, workflow: Option<&str>, limit: usize) -> Vec<InflightExchange> {
        let mut out: Vec<InflightExchange> = self
            .records
            .iter()
            .flat_map(|visits| visits.value().clone())
            .filter(|r| workflow.is_none_or(|w| &*r.at_workflow == w))
            .collect();
        out.sort_by_key(|r| r.since);
        if limit > 0 {
            out.truncate(limit);
        }
        out
    }

    fn decrement(&self, workflow: &str) {
        let empty = match self.counts.get_mut(workflow) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if empty {
            self.counts.remove_if(workflow, |_, c| *c == 0);
        }
    }
}
