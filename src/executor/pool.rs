//! # Bounded worker pool.
//!
//! [`WorkerPool`] runs futures on the tokio runtime with a fixed number of
//! concurrent slots and an optional bounded queue of waiting tasks.
//!
//! ```text
//! spawn(fut)
//!    │ closed?              → PoolError::Shutdown
//!    │ queue full?          → Abort: PoolError::Rejected / Discard: PoolError::Discarded
//!    ▼
//! tracker.spawn ──► wait for permit (or pool cancel) ──► fut.await ──► release permit
//! ```
//!
//! ## Rules
//! - At most `pool_size` futures run at once; the rest wait for a permit.
//! - Tasks still waiting when the pool shuts down never run (their handle yields `None`).
//! - [`WorkerPool::shutdown`] waits up to a grace period for running tasks.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::PoolProfile;
use crate::core::RejectionPolicy;
use crate::error::PoolError;

/// Bounded pool of tokio tasks.
pub struct WorkerPool {
    name: Arc<str>,
    profile: PoolProfile,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl WorkerPool {
    /// Creates a pool; `pool_size` is clamped to at least 1.
    pub fn new(name: impl Into<Arc<str>>, profile: PoolProfile) -> Arc<Self> {
        let size = profile.pool_size.max(1);
        Arc::new(Self {
            name: name.into(),
            profile,
            permits: Arc::new(Semaphore::new(size)),
            queued: Arc::new(AtomicUsize::new(0)),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Profile the pool was created with.
    pub fn profile(&self) -> &PoolProfile {
        &self.profile
    }

    /// Submits a future.
    ///
    /// The returned handle resolves to `None` when the pool shut down before
    /// the future obtained a slot.
    pub fn spawn<F>(&self, fut: F) -> Result<JoinHandle<Option<F::Output>>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(PoolError::Shutdown {
                pool: Arc::clone(&self.name),
            });
        }
        if let Some(limit) = self.profile.queue_limit() {
            let queued = self.queued.load(Ordering::Acquire);
            if queued >= limit && self.permits.available_permits() == 0 {
                tracing::debug!(pool = %self.name, queued, "pool queue full");
                return Err(match self.profile.rejection {
                    RejectionPolicy::Abort => PoolError::Rejected {
                        pool: Arc::clone(&self.name),
                        queued,
                    },
                    RejectionPolicy::Discard => PoolError::Discarded {
                        pool: Arc::clone(&self.name),
                    },
                });
            }
        }

        self.queued.fetch_add(1, Ordering::AcqRel);
        let permits = Arc::clone(&self.permits);
        let queued = Arc::clone(&self.queued);
        let token = self.token.clone();

        Ok(self.tracker.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                p = permits.acquire_owned() => p.ok(),
            };
            queued.fetch_sub(1, Ordering::AcqRel);
            let _permit = permit?;
            Some(fut.await)
        }))
    }

    /// Token cancelled when the pool shuts down; long-running tasks should watch it.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.profile.pool_size.max(1) - self.permits.available_permits()
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops accepting work, cancels queued tasks and waits up to `grace` for running ones.
    ///
    /// Returns `true` when every task finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(pool = %self.name, remaining = self.tracker.len(), ?grace, "pool tasks still running after grace period");
                false
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("profile", &self.profile)
            .field("active", &self.active())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_submitted_future() {
        let pool = WorkerPool::new("test", PoolProfile::fixed(2));
        let handle = pool.spawn(async { 40 + 2 }).unwrap();
        assert_eq!(handle.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_abort_rejects_when_queue_full() {
        let profile = PoolProfile {
            pool_size: 1,
            max_queue_size: 1,
            rejection: RejectionPolicy::Abort,
        };
        let pool = WorkerPool::new("bounded", profile);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let _busy = pool
            .spawn(async move {
                let _ = release_rx.await;
            })
            .unwrap();
        tokio::task::yield_now().await;
        let _waiting = pool.spawn(async {}).unwrap();

        let err = pool.spawn(async {}).unwrap_err();
        assert!(matches!(err, PoolError::Rejected { queued: 1, .. }));

        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn test_discard_policy_reports_discard() {
        let profile = PoolProfile {
            pool_size: 1,
            max_queue_size: 1,
            rejection: RejectionPolicy::Discard,
        };
        let pool = WorkerPool::new("discard", profile);
        let _busy = pool.spawn(std::future::pending::<()>()).unwrap();
        tokio::task::yield_now().await;
        let _waiting = pool.spawn(async {}).unwrap();

        assert!(matches!(
            pool.spawn(async {}),
            Err(PoolError::Discarded { .. })
        ));
        pool.shutdown(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work_and_skips_queued() {
        let pool = WorkerPool::new("single", PoolProfile::single());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let busy = pool
            .spawn(async move {
                let _ = release_rx.await;
            })
            .unwrap();
        tokio::task::yield_now().await;
        let waiting = pool.spawn(async { "never" }).unwrap();

        let _ = release_tx.send(());
        assert!(pool.shutdown(Duration::from_secs(1)).await);

        assert_eq!(busy.await.unwrap(), Some(()));
        assert_eq!(waiting.await.unwrap(), None);
        assert!(matches!(pool.spawn(async {}), Err(PoolError::Shutdown { .. })));
    }
}
