//! # Shutdown coordinator: graceful drain, then force.
//!
//! [`ShutdownCoordinator`] stops (or suspends) a set of workflows in a bounded
//! time. The drain runs on a dedicated single-worker pool while the caller waits
//! up to the timeout; when the timeout elapses the caller cancels the drain and
//! escalates exactly once.
//!
//! ## Architecture
//! ```text
//! caller                                   drain worker (single-thread pool)
//!   │ timeout == 0 → InvalidTimeout
//!   │ sort by rank (reversed by default)
//!   ├─ spawn ───────────────────────────►  immediate pass:
//!   │                                        Defer policy / consumer objects → deferred
//!   │                                        otherwise suspend-or-stop consumer now
//!   │                                      notify ShutdownPrepared services
//!   │                                      poll inflight + pending every poll_interval
//!   │                                      deferred pass: prepare + suspend-or-stop
//!   │ wait ≤ timeout ◄──────────────────── done  → Completed
//!   └─ elapsed:
//!        cancel + abort worker
//!        abort_after_timeout && !forced  → Aborted   (workflows keep running)
//!        forced || shutdown_now_on_timeout
//!            → mark CompleteCurrentTaskOnly, reject new exchanges,
//!              prepare(forced=true), stop consumers now → Forced
//!        otherwise                       → Abandoned (remaining work ignored)
//! ```
//!
//! ## Rules
//! - The coordinator only touches consumers and prepare hooks; the registry owns statuses.
//! - Forced mode (context stop) also raises the shared [`ShutdownFlag`], rejecting exchanges everywhere.
//! - The escalation runs on the caller side, so it happens at most once per request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::ShutdownConfig;
use super::inflight::InflightTracker;
use crate::error::ShutdownError;
use crate::events::{Bus, Event, EventKind};
use crate::executor::ManagedPool;
use crate::workflow::{ShutdownWorkflow, WorkflowService, WorkflowStartupOrder};

/// Shared "forced shutdown in progress" flag checked by every pipeline.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn is_forced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn force(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Result of a shutdown or suspend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Everything drained within the timeout.
    Completed,
    /// Timeout elapsed; remaining workflows were stopped forcibly.
    Forced,
    /// Timeout elapsed; the request was aborted and workflows keep running.
    Aborted,
    /// Timeout elapsed; neither forced nor aborted, remaining work was ignored.
    Abandoned,
}

impl ShutdownOutcome {
    pub fn timed_out(&self) -> bool {
        !matches!(self, ShutdownOutcome::Completed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Request {
    timeout: Duration,
    suspend_only: bool,
    abort_after_timeout: bool,
    forced: bool,
}

/// Graceful-then-forced shutdown of workflows.
pub struct ShutdownCoordinator {
    cfg: ShutdownConfig,
    inflight: Arc<InflightTracker>,
    bus: Bus,
    pool: ManagedPool,
    flag: ShutdownFlag,
    timeout_occurred: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        cfg: ShutdownConfig,
        inflight: Arc<InflightTracker>,
        bus: Bus,
        pool: ManagedPool,
        flag: ShutdownFlag,
    ) -> Self {
        Self {
            cfg,
            inflight,
            bus,
            pool,
            flag,
            timeout_occurred: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.cfg
    }

    pub fn flag(&self) -> &ShutdownFlag {
        &self.flag
    }

    /// Whether the last request hit its timeout.
    pub fn timeout_occurred(&self) -> bool {
        self.timeout_occurred.load(Ordering::Acquire)
    }

    /// Graceful shutdown with the configured timeout.
    pub async fn shutdown(&self, orders: &[WorkflowStartupOrder]) -> Result<ShutdownOutcome, ShutdownError> {
        self.shutdown_with_timeout(orders, self.cfg.timeout).await
    }

    /// Graceful shutdown with an explicit timeout.
    pub async fn shutdown_with_timeout(
        &self,
        orders: &[WorkflowStartupOrder],
        timeout: Duration,
    ) -> Result<ShutdownOutcome, ShutdownError> {
        self.run(
            orders,
            Request {
                timeout,
                suspend_only: false,
                abort_after_timeout: false,
                forced: false,
            },
        )
        .await
    }

    /// Forced-mode shutdown used when the whole context stops.
    pub async fn shutdown_forced(&self, orders: &[WorkflowStartupOrder]) -> Result<ShutdownOutcome, ShutdownError> {
        self.run(
            orders,
            Request {
                timeout: self.cfg.timeout,
                suspend_only: false,
                abort_after_timeout: false,
                forced: true,
            },
        )
        .await
    }

    /// Shuts down a single workflow; with `abort_after_timeout` a timeout aborts instead of forcing.
    pub async fn shutdown_one(
        &self,
        order: &WorkflowStartupOrder,
        timeout: Duration,
        abort_after_timeout: bool,
    ) -> Result<ShutdownOutcome, ShutdownError> {
        self.run(
            std::slice::from_ref(order),
            Request {
                timeout,
                suspend_only: false,
                abort_after_timeout,
                forced: false,
            },
        )
        .await
    }

    /// Suspends workflows (non-suspendable consumers are stopped instead).
    pub async fn suspend(
        &self,
        orders: &[WorkflowStartupOrder],
        timeout: Duration,
    ) -> Result<ShutdownOutcome, ShutdownError> {
        self.run(
            orders,
            Request {
                timeout,
                suspend_only: true,
                abort_after_timeout: false,
                forced: false,
            },
        )
        .await
    }

    async fn run(&self, orders: &[WorkflowStartupOrder], req: Request) -> Result<ShutdownOutcome, ShutdownError> {
        if req.timeout.is_zero() {
            return Err(ShutdownError::InvalidTimeout);
        }
        self.timeout_occurred.store(false, Ordering::Release);
        if orders.is_empty() {
            return Ok(ShutdownOutcome::Completed);
        }

        let mut ordered = orders.to_vec();
        ordered.sort();
        if self.cfg.reverse_order {
            ordered.reverse();
        }

        let verb = if req.suspend_only { "suspend" } else { "shutdown" };
        tracing::info!(workflows = ordered.len(), timeout = ?req.timeout, forced = req.forced, "starting graceful {verb}");

        let token = CancellationToken::new();
        let drain = Drain {
            orders: ordered.clone(),
            inflight: Arc::clone(&self.inflight),
            bus: self.bus.clone(),
            poll: self.cfg.poll_interval.max(Duration::from_millis(1)),
            timeout: req.timeout,
            suspend_only: req.suspend_only,
            token: token.clone(),
        };
        let mut handle = self.pool.get().spawn(drain.run())?;

        match tokio::time::timeout(req.timeout, &mut handle).await {
            Ok(Ok(Some(()))) => {
                tracing::info!(workflows = ordered.len(), "graceful {verb} completed");
                self.bus.publish(Event::new(EventKind::ShutdownCompleted));
                Ok(ShutdownOutcome::Completed)
            }
            Ok(Ok(None)) => Err(ShutdownError::WorkerFailed {
                reason: "drain worker cancelled before it ran".to_string(),
            }),
            Ok(Err(join_err)) => Err(ShutdownError::WorkerFailed {
                reason: join_err.to_string(),
            }),
            Err(_elapsed) => {
                token.cancel();
                handle.abort();
                Ok(self.escalate(&ordered, req).await)
            }
        }
    }

    async fn escalate(&self, ordered: &[WorkflowStartupOrder], req: Request) -> ShutdownOutcome {
        self.timeout_occurred.store(true, Ordering::Release);
        if req.forced {
            self.flag.force();
        }
        let remaining = self.report_inflight(ordered);

        if req.abort_after_timeout && !req.forced {
            tracing::warn!(timeout = ?req.timeout, remaining, "timeout occurred during graceful shutdown; aborting");
            self.bus
                .publish(Event::new(EventKind::ShutdownAborted).with_inflight(remaining));
            return ShutdownOutcome::Aborted;
        }

        if req.forced || self.cfg.shutdown_now_on_timeout {
            tracing::warn!(timeout = ?req.timeout, remaining, "timeout occurred during graceful shutdown; forcing the shutdown now");
            for order in ordered {
                force_stop(order.service(), req.suspend_only).await;
            }
            self.bus
                .publish(Event::new(EventKind::ShutdownForced).with_inflight(remaining));
            return ShutdownOutcome::Forced;
        }

        tracing::warn!(timeout = ?req.timeout, remaining, "timeout occurred during graceful shutdown; ignoring remaining work");
        self.bus
            .publish(Event::new(EventKind::ShutdownTimedOut).with_inflight(remaining));
        ShutdownOutcome::Abandoned
    }

    fn report_inflight(&self, ordered: &[WorkflowStartupOrder]) -> usize {
        let total: usize = ordered.iter().map(|o| pending(&self.inflight, o.service())).sum();
        if !self.cfg.log_inflight_on_timeout {
            return total;
        }
        for order in ordered {
            for rec in self.inflight.browse(Some(order.id()), 0) {
                if self.cfg.suppress_logging_on_timeout {
                    tracing::debug!(exchange = %rec.exchange_id, workflow = %rec.at_workflow, node = ?rec.node_id, elapsed = ?rec.elapsed(), "in-flight exchange at shutdown timeout");
                } else {
                    tracing::warn!(exchange = %rec.exchange_id, workflow = %rec.at_workflow, node = ?rec.node_id, elapsed = ?rec.elapsed(), "in-flight exchange at shutdown timeout");
                }
            }
        }
        total
    }
}

/// Tracked in-flight exchanges plus consumer-side pending work.
fn pending(inflight: &InflightTracker, service: &WorkflowService) -> usize {
    let consumer_pending = service
        .consumer()
        .map(|c| c.shutdown_aware().map_or(0, |a| a.pending_exchanges()))
        .unwrap_or(0);
    inflight.size_of(service.id()) + consumer_pending
}

async fn suspend_or_stop(service: &WorkflowService, suspend_only: bool) {
    let result = if suspend_only && service.can_suspend() {
        service.suspend_consumer().await
    } else {
        service.stop_consumer().await
    };
    if let Err(err) = result {
        tracing::warn!(workflow = %service.id(), error = %err, "failed to halt consumer");
    }
}

async fn force_stop(service: &WorkflowService, suspend_only: bool) {
    service.mark_forced();
    if let Some(consumer) = service.consumer() {
        if let Some(aware) = consumer.shutdown_aware() {
            aware.prepare_shutdown(suspend_only, true);
        } else if let Some(prepared) = consumer.shutdown_prepared() {
            prepared.prepare_shutdown(suspend_only, true);
        }
    }
    for nested in service.services() {
        if let Some(prepared) = nested.shutdown_prepared() {
            prepared.prepare_shutdown(suspend_only, true);
        }
    }
    suspend_or_stop(service, suspend_only).await;
}

struct Drain {
    orders: Vec<WorkflowStartupOrder>,
    inflight: Arc<InflightTracker>,
    bus: Bus,
    poll: Duration,
    timeout: Duration,
    suspend_only: bool,
    token: CancellationToken,
}

impl Drain {
    async fn run(self) {
        let mut deferred = Vec::new();
        for order in &self.orders {
            if self.token.is_cancelled() {
                return;
            }
            let service = order.service();
            let workflow = service.workflow();
            let objects = service
                .consumer()
                .is_some_and(|c| c.shutdown_aware().is_some_and(|a| a.defer_shutdown(workflow.running_task())));
            let suspend = self.suspend_only && service.can_suspend();

            if workflow.shutdown_workflow() == ShutdownWorkflow::Defer || (objects && !suspend) {
                tracing::debug!(workflow = %order.id(), "deferring consumer shutdown");
                deferred.push(order);
            } else {
                suspend_or_stop(service, self.suspend_only).await;
            }
        }

        for order in &self.orders {
            for nested in order.service().services() {
                if let Some(prepared) = nested.shutdown_prepared() {
                    prepared.prepare_shutdown(self.suspend_only, false);
                }
            }
        }

        loop {
            let counts: Vec<(&Arc<str>, usize)> = self
                .orders
                .iter()
                .map(|o| (o.id(), pending(&self.inflight, o.service())))
                .collect();
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            if total == 0 {
                break;
            }
            for (id, n) in counts.iter().filter(|(_, n)| *n > 0) {
                tracing::info!(workflow = %id, inflight = n, "waiting for in-flight exchanges to complete");
            }
            self.bus.publish(
                Event::new(EventKind::ShutdownDraining)
                    .with_inflight(total)
                    .with_timeout(self.timeout),
            );
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(self.poll) => {}
            }
        }

        for order in deferred {
            if self.token.is_cancelled() {
                return;
            }
            let service = order.service();
            if let Some(consumer) = service.consumer() {
                if let Some(aware) = consumer.shutdown_aware() {
                    aware.prepare_shutdown(self.suspend_only, false);
                }
            }
            suspend_or_stop(service, self.suspend_only).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PoolProfile;
    use crate::executor::DefaultExecutorProvider;
    use crate::testing::{Harness, test_workflow};
    use crate::workflow::{Exchange, ServiceStatus, ShutdownRunningTask};
    use serde_json::json;

    fn coordinator(h: &Harness, cfg: ShutdownConfig) -> ShutdownCoordinator {
        let provider = Arc::new(DefaultExecutorProvider::default());
        ShutdownCoordinator::new(
            cfg,
            Arc::clone(&h.inflight),
            Bus::new(64),
            ManagedPool::new(provider, "shutdown", PoolProfile::single()),
            h.flag.clone(),
        )
    }

    fn cfg(timeout_secs: u64) -> ShutdownConfig {
        ShutdownConfig {
            timeout: Duration::from_secs(timeout_secs),
            ..ShutdownConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_is_rejected() {
        let h = Harness::new();
        let c = coordinator(&h, cfg(1));
        let err = c.shutdown_with_timeout(&[], Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ShutdownError::InvalidTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_in_reverse_startup_order() {
        let h = Harness::new();
        let a = h.started(test_workflow("a").build(h.noop()), 1).await;
        let b = h.started(test_workflow("b").build(h.noop()), 2).await;
        let c = coordinator(&h, cfg(10));

        let orders = vec![a.startup_order().unwrap(), b.startup_order().unwrap()];
        let outcome = c.shutdown(&orders).await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert!(!c.timeout_occurred());
        let stops: Vec<String> = h.journal.entries().into_iter().filter(|e| e.starts_with("stop:")).collect();
        assert_eq!(stops, vec!["stop:b", "stop:a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_workflow_waits_for_inflight_drain() {
        let h = Harness::new();
        let svc = h
            .started(test_workflow("slow").shutdown_workflow(ShutdownWorkflow::Defer).build(h.noop()), 1)
            .await;
        let ex = Exchange::new(json!(null));
        h.inflight.add(&ex, svc.id());

        let inflight = Arc::clone(&h.inflight);
        let id = Arc::clone(ex.id());
        let workflow = Arc::clone(svc.id());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            inflight.remove(&id, &workflow);
        });

        let c = coordinator(&h, cfg(10));
        let started = tokio::time::Instant::now();
        let outcome = c.shutdown(&[svc.startup_order().unwrap()]).await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_millis(2500));
        assert!(h.journal.contains("stop:slow"));
        assert!(!svc.is_consumer_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_forces_stop_of_stuck_workflow() {
        let h = Harness::new();
        let svc = h
            .started(test_workflow("stuck").shutdown_workflow(ShutdownWorkflow::Defer).build(h.noop()), 1)
            .await;
        h.inflight.add(&Exchange::new(json!(null)), svc.id());

        let c = coordinator(&h, cfg(3));
        let started = tokio::time::Instant::now();
        let outcome = c.shutdown(&[svc.startup_order().unwrap()]).await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert!(c.timeout_occurred());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!svc.is_consumer_running());
        assert!(svc.pipeline().is_forced());
        assert_eq!(svc.workflow().running_task(), ShutdownRunningTask::CompleteCurrentTaskOnly);
        assert!(!h.flag.is_forced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_mode_raises_shared_flag() {
        let h = Harness::new();
        h.resolver.knobs("stuck").set_aware(true);
        let svc = h
            .started(test_workflow("stuck").shutdown_workflow(ShutdownWorkflow::Defer).build(h.noop()), 1)
            .await;
        h.inflight.add(&Exchange::new(json!(null)), svc.id());

        let c = coordinator(&h, cfg(1));
        let outcome = c.shutdown_forced(&[svc.startup_order().unwrap()]).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert!(h.flag.is_forced());
        assert!(h.journal.contains("prepare:stuck:false:true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_after_timeout_keeps_deferred_consumer_running() {
        let h = Harness::new();
        let svc = h
            .started(test_workflow("keep").shutdown_workflow(ShutdownWorkflow::Defer).build(h.noop()), 1)
            .await;
        h.inflight.add(&Exchange::new(json!(null)), svc.id());

        let c = coordinator(&h, cfg(2));
        let outcome = c
            .shutdown_one(&svc.startup_order().unwrap(), Duration::from_secs(2), true)
            .await
            .unwrap();

        assert_eq!(outcome, ShutdownOutcome::Aborted);
        assert!(svc.is_consumer_running());
        assert_eq!(svc.status(), ServiceStatus::Started);
        assert!(!svc.pipeline().is_forced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_when_force_disabled() {
        let h = Harness::new();
        let svc = h
            .started(test_workflow("left").shutdown_workflow(ShutdownWorkflow::Defer).build(h.noop()), 1)
            .await;
        h.inflight.add(&Exchange::new(json!(null)), svc.id());

        let c = coordinator(
            &h,
            ShutdownConfig {
                shutdown_now_on_timeout: false,
                ..cfg(1)
            },
        );
        let outcome = c.shutdown(&[svc.startup_order().unwrap()]).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Abandoned);
        assert!(svc.is_consumer_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_objecting_consumer_is_deferred_until_pending_work_drains() {
        let h = Harness::new();
        let knobs = h.resolver.knobs("busy");
        knobs.set_aware(true);
        knobs.set_defer(true);
        knobs.set_pending(1);
        let svc = h.started(test_workflow("busy").build(h.noop()), 1).await;

        let k = Arc::clone(&knobs);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            k.set_pending(0);
        });

        let c = coordinator(&h, cfg(10));
        let outcome = c.shutdown(&[svc.startup_order().unwrap()]).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Completed);

        let entries = h.journal.entries();
        let prepare = entries.iter().position(|e| e == "prepare:busy:false:false").unwrap();
        let stop = entries.iter().position(|e| e == "stop:busy").unwrap();
        assert!(prepare < stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_keeps_suspendable_consumers() {
        let h = Harness::new();
        h.resolver.knobs("pausable").set_suspendable(true);
        let pausable = h.started(test_workflow("pausable").build(h.noop()), 1).await;
        let plain = h.started(test_workflow("plain").build(h.noop()), 2).await;

        let c = coordinator(&h, cfg(5));
        let orders = vec![pausable.startup_order().unwrap(), plain.startup_order().unwrap()];
        let outcome = c.suspend(&orders, Duration::from_secs(5)).await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Completed);
        assert_eq!(pausable.status(), ServiceStatus::Suspended);
        assert!(h.journal.contains("suspend:pausable"));
        assert!(h.journal.contains("stop:plain"));
    }
}
