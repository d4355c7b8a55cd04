//! # Continuation pool.
//!
//! A continuation carries the advice state slots and the caller's callback while
//! an exchange is inside the processor. Pipelines recycle continuations instead
//! of allocating the slot vector for every exchange.
//!
//! ## Rules
//! - A continuation is reset (all slots cleared, callback dropped) before it returns to the pool.
//! - At most `capacity` idle continuations are retained; extras are dropped.
//! - With pooling disabled every checkout allocates.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::advice::AdviceState;
use super::processor::AsyncCallback;

pub(crate) struct Continuation {
    pub(crate) states: Vec<Option<AdviceState>>,
    /// Number of advices whose `before` completed.
    pub(crate) ran: usize,
    pub(crate) callback: Option<AsyncCallback>,
}

impl Continuation {
    fn with_slots(slots: usize) -> Self {
        Self {
            states: (0..slots).map(|_| None).collect(),
            ran: 0,
            callback: None,
        }
    }

    fn reset(&mut self) {
        self.states.iter_mut().for_each(|s| *s = None);
        self.ran = 0;
        self.callback = None;
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub idle: usize,
}

pub struct ContinuationPool {
    slots: usize,
    capacity: usize,
    enabled: bool,
    idle: Mutex<Vec<Continuation>>,
    created: AtomicU64,
    reused: AtomicU64,
}

impl ContinuationPool {
    pub fn new(slots: usize, capacity: usize, enabled: bool) -> Self {
        Self {
            slots,
            capacity,
            enabled,
            idle: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    pub(crate) fn checkout(&self) -> Continuation {
        if self.enabled {
            if let Some(c) = self.idle.lock().pop() {
                self.reused.fetch_add(1, Ordering::Relaxed);
                return c;
            }
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Continuation::with_slots(self.slots)
    }

    pub(crate) fn release(&self, mut c: Continuation) {
        c.reset();
        if !self.enabled {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(c);
        }
    }

    /// Drops every idle continuation.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_continuation_is_reset_and_reused() {
        let pool = ContinuationPool::new(2, 4, true);
        let mut c = pool.checkout();
        c.states[1] = Some(Box::new(7u32));
        c.ran = 2;
        pool.release(c);

        let c = pool.checkout();
        assert!(c.states.iter().all(Option::is_none));
        assert_eq!(c.ran, 0);
        assert_eq!(pool.stats(), PoolStats { created: 1, reused: 1, idle: 0 });
    }

    #[test]
    fn test_capacity_bounds_idle_set() {
        let pool = ContinuationPool::new(0, 1, true);
        let (a, b) = (pool.checkout(), pool.checkout());
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn test_disabled_pool_never_retains() {
        let pool = ContinuationPool::new(1, 8, false);
        let c = pool.checkout();
        pool.release(c);
        let _ = pool.checkout();
        assert_eq!(pool.stats(), PoolStats { created: 2, reused: 0, idle: 0 });
    }
}
