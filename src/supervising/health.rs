use std::sync::Arc;

use dashmap::DashMap;

use crate::error::SupervisionError;

/// Receives health changes of supervised workflows.
pub trait HealthSink: Send + Sync + 'static {
    fn mark_unhealthy(&self, id: &str, reason: &SupervisionError);

    fn mark_healthy(&self, _id: &str) {}
}

/// In-memory [`HealthSink`] keeping the last reason per unhealthy workflow.
#[derive(Debug, Default)]
pub struct HealthState {
    unhealthy: DashMap<Arc<str>, SupervisionError>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }

    pub fn reason(&self, id: &str) -> Option<SupervisionError> {
        self.unhealthy.get(id).map(|r| r.clone())
    }

    /// Unhealthy workflow ids, sorted.
    pub fn unhealthy(&self) -> Vec<Arc<str>> {
        let mut ids: Vec<Arc<str>> = self.unhealthy.iter().map(|e| Arc::clone(e.key())).collect();
        ids.sort_unstable();
        ids
    }
}

impl HealthSink for HealthState {
    fn mark_unhealthy(&self, id: &str, reason: &SupervisionError) {
        self.unhealthy.insert(id.into(), reason.clone());
    }

    fn mark_healthy(&self, id: &str) {
        self.unhealthy.remove(id);
    }
}
