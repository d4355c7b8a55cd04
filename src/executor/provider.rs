//! # Executor provider.
//!
//! [`ExecutorProvider`] is the single place the context asks for worker pools.
//! Every pool it hands out is remembered so the context can release them all,
//! last, when it stops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::pool::WorkerPool;
use crate::core::PoolProfile;

/// Source of worker pools for the context and its collaborators.
#[async_trait]
pub trait ExecutorProvider: Send + Sync + 'static {
    /// Creates (and tracks) a new pool.
    fn new_pool(&self, name: &str, profile: PoolProfile) -> Arc<WorkerPool>;

    /// Shuts down every pool created so far.
    async fn shutdown_all(&self);
}

/// Default provider backed by [`WorkerPool`].
pub struct DefaultExecutorProvider {
    pools: Mutex<Vec<Arc<WorkerPool>>>,
    grace: Duration,
}

impl DefaultExecutorProvider {
    /// Creates a provider whose pools get `grace` to finish running tasks at shutdown.
    pub fn new(grace: Duration) -> Self {
        Self {
            pools: Mutex::new(Vec::new()),
            grace,
        }
    }

    /// Number of pools currently tracked.
    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }
}

impl Default for DefaultExecutorProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ExecutorProvider for DefaultExecutorProvider {
    fn new_pool(&self, name: &str, profile: PoolProfile) -> Arc<WorkerPool> {
        let pool = WorkerPool::new(name, profile);
        let mut pools = self.pools.lock();
        pools.retain(|p| !p.is_shutdown());
        pools.push(Arc::clone(&pool));
        tracing::debug!(pool = name, size = pool.profile().pool_size, "created worker pool");
        pool
    }

    async fn shutdown_all(&self) {
        let pools: Vec<_> = std::mem::take(&mut *self.pools.lock());
        for pool in pools {
            pool.shutdown(self.grace).await;
        }
    }
}

/// Named pool that is re-created from the provider after it was shut down.
///
/// Collaborators that outlive a context stop/start cycle hold one of these
/// instead of a bare [`WorkerPool`].
pub struct ManagedPool {
    provider: Arc<dyn ExecutorProvider>,
    name: Arc<str>,
    profile: PoolProfile,
    current: Mutex<Option<Arc<WorkerPool>>>,
}

impl ManagedPool {
    pub fn new(provider: Arc<dyn ExecutorProvider>, name: impl Into<Arc<str>>, profile: PoolProfile) -> Self {
        Self {
            provider,
            name: name.into(),
            profile,
            current: Mutex::new(None),
        }
    }

    /// Returns the live pool, creating a fresh one when none exists or the last was shut down.
    pub fn get(&self) -> Arc<WorkerPool> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(pool) if !pool.is_shutdown() => Arc::clone(pool),
            _ => {
                let pool = self.provider.new_pool(&self.name, self.profile.clone());
                *current = Some(Arc::clone(&pool));
                pool
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_managed_pool_recreates_after_shutdown() {
        let provider = Arc::new(DefaultExecutorProvider::new(Duration::from_millis(10)));
        let managed = ManagedPool::new(provider.clone(), "managed", PoolProfile::single());

        let first = managed.get();
        assert!(Arc::ptr_eq(&first, &managed.get()));

        provider.shutdown_all().await;
        let second = managed.get();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_all_releases_every_pool() {
        let provider = DefaultExecutorProvider::new(Duration::from_millis(50));
        let a = provider.new_pool("a", PoolProfile::single());
        let b = provider.new_pool("b", PoolProfile::fixed(4));
        assert_eq!(provider.pool_count(), 2);

        provider.shutdown_all().await;
        assert!(a.is_shutdown() && b.is_shutdown());
        assert_eq!(provider.pool_count(), 0);
    }
}
