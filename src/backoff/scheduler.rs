//! # Keyed backoff scheduler.
//!
//! [`BackoffScheduler`] runs one retry loop per key. Each loop sleeps for the
//! policy delay, runs the attempt function on a worker pool and repeats until the
//! attempt succeeds, the budget is exhausted or the task is cancelled.
//!
//! ```text
//! schedule(key, policy, f)
//!   └─► loop (own task):
//!         delay = policy.next(n)        ── elapsed budget exceeded? → Exhausted
//!         sleep(delay) | cancelled      ── cancelled               → Cancelled
//!         n += 1; pool.spawn(f(state)).await
//!            ├─ Ok          → Completed
//!            ├─ pool closed → Cancelled
//!            └─ Err         → record error  ── attempts >= max?    → Exhausted
//! ```
//!
//! ## Rules
//! - At most one active task per key; scheduling an active key returns the existing task.
//! - Pool slots bound concurrent attempts only; waiting between attempts holds no slot.
//! - An attempt in progress is never interrupted; cancellation is observed between attempts.
//! - A task reaches exactly one terminal status and runs its completion hooks once.
//! - Terminal tasks are removed from the scheduler.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::policy::BackoffPolicy;
use crate::error::PoolError;
use crate::events::{Bus, Event, EventKind};
use crate::executor::{ManagedPool, WorkerPool};

/// Status of a backoff task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStatus {
    Active,
    Completed,
    Exhausted,
    Cancelled,
}

impl BackoffStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackoffStatus::Active)
    }
}

/// Snapshot of a backoff task.
#[derive(Debug, Clone)]
pub struct BackoffState {
    /// Task key (workflow id for supervised restarts).
    pub key: Arc<str>,
    pub status: BackoffStatus,
    /// Attempts performed so far.
    pub attempts: u32,
    /// Delay before the next attempt.
    pub next_delay: Duration,
    /// Time since the task was scheduled, measured at the last attempt.
    pub elapsed: Duration,
    pub last_attempt_at: Option<SystemTime>,
    /// Display form of the last attempt error.
    pub last_error: Option<Arc<str>>,
}

impl BackoffState {
    fn new(key: Arc<str>) -> Self {
        Self {
            key,
            status: BackoffStatus::Active,
            attempts: 0,
            next_delay: Duration::ZERO,
            elapsed: Duration::ZERO,
            last_attempt_at: None,
            last_error: None,
        }
    }
}

type Completion = Box<dyn FnOnce(&BackoffState) + Send + 'static>;

struct Cell {
    state: BackoffState,
    completions: Vec<Completion>,
}

struct Shared {
    cell: Mutex<Cell>,
    status: watch::Sender<BackoffStatus>,
    token: CancellationToken,
}

/// Handle to a scheduled backoff loop.
#[derive(Clone)]
pub struct BackoffTask {
    shared: Arc<Shared>,
}

impl BackoffTask {
    fn new(key: Arc<str>, token: CancellationToken) -> Self {
        let (status, _) = watch::channel(BackoffStatus::Active);
        Self {
            shared: Arc::new(Shared {
                cell: Mutex::new(Cell {
                    state: BackoffState::new(key),
                    completions: Vec::new(),
                }),
                status,
                token,
            }),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> BackoffState {
        self.shared.cell.lock().state.clone()
    }

    pub fn status(&self) -> BackoffStatus {
        self.shared.cell.lock().state.status
    }

    /// Token cancelled together with the task.
    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Cancels the task. No further attempts start after this call.
    ///
    /// Returns `false` when the task had already finished.
    pub fn cancel(&self) -> bool {
        self.shared.token.cancel();
        self.finish(BackoffStatus::Cancelled)
    }

    /// Registers a hook run once with the terminal state.
    ///
    /// Runs immediately when the task already finished.
    pub fn when_complete(&self, f: impl FnOnce(&BackoffState) + Send + 'static) {
        let mut cell = self.shared.cell.lock();
        if cell.state.status.is_terminal() {
            let snapshot = cell.state.clone();
            drop(cell);
            f(&snapshot);
        } else {
            cell.completions.push(Box::new(f));
        }
    }

    /// Waits for the terminal state.
    pub async fn wait(&self) -> BackoffState {
        let mut rx = self.shared.status.subscribe();
        let _ = rx.wait_for(BackoffStatus::is_terminal).await;
        self.state()
    }

    fn same(&self, other: &BackoffTask) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn update(&self, f: impl FnOnce(&mut BackoffState)) -> BackoffState {
        let mut cell = self.shared.cell.lock();
        f(&mut cell.state);
        cell.state.clone()
    }

    fn finish(&self, status: BackoffStatus) -> bool {
        let (snapshot, completions) = {
            let mut cell = self.shared.cell.lock();
            if cell.state.status.is_terminal() {
                return false;
            }
            cell.state.status = status;
            (cell.state.clone(), std::mem::take(&mut cell.completions))
        };
        self.shared.status.send_replace(status);
        for f in completions {
            f(&snapshot);
        }
        true
    }
}

impl std::fmt::Debug for BackoffTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BackoffTask").field(&self.state()).finish()
    }
}

/// Runs keyed backoff loops on a managed worker pool.
pub struct BackoffScheduler {
    pool: ManagedPool,
    bus: Bus,
    tasks: Arc<DashMap<Arc<str>, BackoffTask>>,
}

impl BackoffScheduler {
    pub fn new(pool: ManagedPool, bus: Bus) -> Self {
        Self {
            pool,
            bus,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Schedules `attempt` under `key` following `policy`.
    ///
    /// The attempt function receives the state snapshot of the current attempt
    /// (`attempts` is 1-based) and the task's cancellation token. An attempt that
    /// acts on shared state should re-check the token once it holds that state.
    pub fn schedule<F, Fut, E>(
        &self,
        key: impl Into<Arc<str>>,
        policy: BackoffPolicy,
        attempt: F,
    ) -> Result<BackoffTask, PoolError>
    where
        F: FnMut(BackoffState, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let key = key.into();
        let pool = self.pool.get();

        let task = match self.tasks.entry(Arc::clone(&key)) {
            dashmap::Entry::Occupied(existing) if !existing.get().status().is_terminal() => {
                return Ok(existing.get().clone());
            }
            entry => {
                let task = BackoffTask::new(Arc::clone(&key), pool.child_token());
                entry.insert(task.clone());
                task
            }
        };

        let tasks: Weak<DashMap<Arc<str>, BackoffTask>> = Arc::downgrade(&self.tasks);
        let registered = task.clone();
        task.when_complete(move |state| {
            if let Some(tasks) = tasks.upgrade() {
                tasks.remove_if(&state.key, |_, t| t.same(&registered));
            }
        });

        if pool.is_shutdown() {
            task.cancel();
            return Err(PoolError::Shutdown {
                pool: Arc::from(pool.name()),
            });
        }
        tokio::spawn(drive(task.clone(), policy, attempt, pool, self.bus.clone()));
        Ok(task)
    }

    /// Active task for `key`, if any.
    pub fn get(&self, key: &str) -> Option<BackoffTask> {
        self.tasks.get(key).map(|t| t.clone())
    }

    /// Cancels and removes the task for `key`. Returns `true` when one was active.
    pub fn cancel(&self, key: &str) -> bool {
        match self.tasks.remove(key) {
            Some((_, task)) => task.cancel(),
            None => false,
        }
    }

    /// Cancels every active task.
    pub fn cancel_all(&self) {
        let tasks: Vec<BackoffTask> = self.tasks.iter().map(|t| t.value().clone()).collect();
        self.tasks.clear();
        for task in tasks {
            task.cancel();
        }
    }

    /// Keys with an active task, sorted.
    pub fn keys(&self) -> Vec<Arc<str>> {
        let mut keys: Vec<Arc<str>> = self.tasks.iter().map(|t| Arc::clone(t.key())).collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

async fn drive<F, Fut, E>(
    task: BackoffTask,
    policy: BackoffPolicy,
    mut attempt: F,
    pool: Arc<WorkerPool>,
    bus: Bus,
) where
    F: FnMut(BackoffState, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let started = Instant::now();
    let token = task.shared.token.clone();
    let mut n: u32 = 0;

    loop {
        let delay = policy.next(n);
        if policy.elapsed_exhausted(started.elapsed(), delay) {
            task.finish(BackoffStatus::Exhausted);
            return;
        }
        let key = task.update(|s| s.next_delay = delay).key;
        bus.publish(
            Event::new(EventKind::BackoffScheduled)
                .with_workflow(key)
                .with_attempt(n + 1)
                .with_delay(delay),
        );

        tokio::select! {
            _ = token.cancelled() => {
                task.finish(BackoffStatus::Cancelled);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        n += 1;
        let snapshot = task.update(|s| {
            s.attempts = n;
            s.elapsed = started.elapsed();
            s.last_attempt_at = Some(SystemTime::now());
        });
        let outcome = match pool.spawn(attempt(snapshot, token.clone())) {
            Ok(handle) => match handle.await {
                Ok(Some(result)) => result.map_err(|err| Arc::<str>::from(err.to_string())),
                Ok(None) => {
                    task.finish(BackoffStatus::Cancelled);
                    return;
                }
                Err(join) => Err(Arc::from(format!("attempt panicked: {join}"))),
            },
            Err(PoolError::Shutdown { .. }) => {
                task.finish(BackoffStatus::Cancelled);
                return;
            }
            Err(err) => Err(Arc::from(err.to_string())),
        };
        match outcome {
            Ok(()) => {
                task.finish(BackoffStatus::Completed);
                return;
            }
            Err(reason) => {
                tracing::debug!(key = %task.state().key, attempt = n, %reason, "backoff attempt failed");
                task.update(|s| s.last_error = Some(reason));
            }
        }

        if token.is_cancelled() {
            task.finish(BackoffStatus::Cancelled);
            return;
        }
        if policy.attempts_exhausted(n) {
            task.finish(BackoffStatus::Exhausted);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PoolProfile;
    use crate::executor::DefaultExecutorProvider;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scheduler() -> BackoffScheduler {
        let provider = Arc::new(DefaultExecutorProvider::default());
        BackoffScheduler::new(
            ManagedPool::new(provider, "backoff", PoolProfile::fixed(2)),
            Bus::new(64),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_first_success() {
        let sched = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let task = sched
            .schedule("wf", BackoffPolicy::fixed(Duration::from_secs(1), 5), move |st, _| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if st.attempts < 3 { Err("not yet") } else { Ok(()) }
                }
            })
            .unwrap();

        let done = task.wait().await;
        assert_eq!(done.status, BackoffStatus::Completed);
        assert_eq!(done.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        tokio::task::yield_now().await;
        assert!(sched.get("wf").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let sched = scheduler();
        let task = sched
            .schedule("wf", BackoffPolicy::fixed(Duration::from_millis(100), 2), |_, _| async {
                Err::<(), _>("down")
            })
            .unwrap();

        let done = task.wait().await;
        assert_eq!(done.status, BackoffStatus::Exhausted);
        assert_eq!(done.attempts, 2);
        assert_eq!(done.last_error.as_deref(), Some("down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_exhausts() {
        let sched = scheduler();
        let policy = BackoffPolicy {
            max_elapsed: Duration::from_secs(5),
            ..BackoffPolicy::fixed(Duration::from_secs(2), 0)
        };
        let task = sched
            .schedule("wf", policy, |_, _| async { Err::<(), _>("down") })
            .unwrap();

        let done = task.wait().await;
        assert_eq!(done.status, BackoffStatus::Exhausted);
        assert_eq!(done.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_further_attempts() {
        let sched = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let task = sched
            .schedule("wf", BackoffPolicy::fixed(Duration::from_secs(10), 0), move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("down") }
            })
            .unwrap();

        assert!(sched.cancel("wf"));
        assert_eq!(task.wait().await.status, BackoffStatus::Cancelled);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!task.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_key_is_not_scheduled_twice() {
        let sched = scheduler();
        let first = sched
            .schedule("wf", BackoffPolicy::fixed(Duration::from_secs(10), 0), |_, _| async {
                Err::<(), _>("down")
            })
            .unwrap();
        let second = sched
            .schedule("wf", BackoffPolicy::fixed(Duration::from_secs(1), 0), |_, _| async {
                Ok::<(), String>(())
            })
            .unwrap();

        assert!(first.same(&second));
        assert_eq!(sched.keys().len(), 1);
        sched.cancel_all();
        assert!(sched.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_loops_do_not_hold_pool_slots() {
        let provider = Arc::new(DefaultExecutorProvider::default());
        let sched = BackoffScheduler::new(
            ManagedPool::new(provider, "backoff", PoolProfile::fixed(1)),
            Bus::new(64),
        );
        let forever = sched
            .schedule("down", BackoffPolicy::fixed(Duration::from_secs(1), 0), |_, _| async {
                Err::<(), _>("down")
            })
            .unwrap();
        let flaky = sched
            .schedule("flaky", BackoffPolicy::fixed(Duration::from_secs(1), 0), |st, _| async move {
                if st.attempts < 2 { Err("not yet") } else { Ok(()) }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(flaky.status(), BackoffStatus::Completed);
        assert_eq!(flaky.state().attempts, 2);
        assert_eq!(forever.status(), BackoffStatus::Active);
        assert!(forever.state().attempts >= 3);
        sched.cancel_all();
    }
}
