//! # UnitSupervisor: the shared start/stop/restart machinery.
//!
//! [`UnitSupervisor`] implements [`Supervisor`] for any [`Worker`]. Each start
//! creates an *instance*: a fresh internal token, a fresh exit signal and the
//! next generation number. Nothing is reused across a restart.
//!
//! ## Start
//! ```text
//! start(ctx) ──► tracker.spawn(run):
//!   ├─► begin: generation += 1, new token, state = Running
//!   ├─► tracker.spawn(run_worker(token, exited))
//!   ├─► audit "<Unit> Supervisor starting"
//!   ├─► select! {
//!   │     ctx.parent.cancelled()   (daemon shutdown)
//!   │     token.cancelled()        (direct stop / restart)
//!   │     exited.cancelled()       (worker ended on its own)
//!   │   }
//!   ├─► cancel token (state = Stopping)
//!   ├─► await worker exit
//!   ├─► audit "<Unit> Supervisor stopped"   (ERROR level if the worker failed)
//!   └─► state = Stopped, task returns (tracker completion)
//! ```
//!
//! ## Restart
//! ```text
//! restart() ──► tracker.spawn:
//!   ├─► audit "<Unit> Supervisor restarting"
//!   ├─► cancel old token
//!   ├─► await old exit signal, at most `restart_grace`
//!   └─► parent still active? ──► start(ctx)   (new generation)
//! ```
//!
//! ## Rules
//! - State writes from a superseded instance are ignored (generation guard).
//! - The restart routine runs on the tracker, so the daemon's wait cannot
//!   complete between the old instance ending and the new one registering.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, Level, TOPIC_LIFECYCLE};
use crate::error::SupervisorError;
use crate::supervisors::worker::{run_worker, WorkerExit};
use crate::supervisors::{Supervisor, SupervisorContext, SupervisorState, Worker};

/// One started incarnation of the unit.
#[derive(Clone)]
struct Instance {
    generation: u64,
    token: CancellationToken,
    exited: CancellationToken,
}

#[derive(Default)]
struct Inner {
    ctx: Option<SupervisorContext>,
    instance: Option<Instance>,
    generation: u64,
}

/// Supervises one [`Worker`] with the shared lifecycle contract.
pub struct UnitSupervisor<W> {
    worker: Arc<W>,
    restart_grace: Duration,
    inner: Mutex<Inner>,
    state: watch::Sender<SupervisorState>,
}

impl<W: Worker> UnitSupervisor<W> {
    /// Creates a unit in [`SupervisorState::NotStarted`].
    ///
    /// `restart_grace` bounds how long a restart waits for the old worker.
    pub fn new(worker: W, restart_grace: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(SupervisorState::NotStarted);
        Arc::new(Self {
            worker: Arc::new(worker),
            restart_grace,
            inner: Mutex::new(Inner::default()),
            state,
        })
    }

    /// Number of instances started so far (0 before the first start).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Token of the current instance, if any.
    pub fn internal_token(&self) -> Option<CancellationToken> {
        self.lock().instance.as_ref().map(|i| i.token.clone())
    }

    /// Receiver observing state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Publishes `next` if `generation` is still the current instance.
    fn transition(&self, generation: u64, next: SupervisorState) {
        let inner = self.lock();
        if inner.generation != generation {
            return;
        }
        self.state.send_if_modified(|s| {
            let allowed = matches!(
                (*s, next),
                (_, SupervisorState::Running)
                    | (SupervisorState::Running, SupervisorState::Stopping)
                    | (SupervisorState::Running | SupervisorState::Stopping, SupervisorState::Stopped)
            );
            if allowed && *s != next {
                *s = next;
                true
            } else {
                false
            }
        });
    }

    /// Creates and launches a new instance unless one is already running.
    fn begin(&self, ctx: &SupervisorContext) -> Option<(Instance, JoinHandle<WorkerExit>)> {
        let mut inner = self.lock();
        if let Some(current) = &inner.instance {
            if !current.token.is_cancelled() {
                warn!(
                    unit = self.worker.group(),
                    generation = current.generation,
                    "start refused: unit already running"
                );
                return None;
            }
        }

        inner.generation += 1;
        let instance = Instance {
            generation: inner.generation,
            token: CancellationToken::new(),
            exited: CancellationToken::new(),
        };
        inner.instance = Some(instance.clone());
        inner.ctx = Some(ctx.clone());
        self.state.send_replace(SupervisorState::Running);

        let worker = Arc::clone(&self.worker);
        let (token, exited) = (instance.token.clone(), instance.exited.clone());
        let handle = ctx
            .tracker
            .spawn(async move { run_worker(worker.as_ref(), token, exited).await });

        Some((instance, handle))
    }

    /// Cancels `instance`'s token; no-op if already cancelled.
    fn stop_instance(&self, instance: &Instance) {
        if instance.token.is_cancelled() {
            debug!(
                unit = self.worker.group(),
                generation = instance.generation,
                "stop ignored: already stopping"
            );
            return;
        }
        instance.token.cancel();
        self.transition(instance.generation, SupervisorState::Stopping);
    }

    fn lifecycle(&self, level: Level, what: &str, generation: u64) -> AuditEvent {
        AuditEvent::new(
            level,
            self.worker.group(),
            TOPIC_LIFECYCLE,
            format!("{} Supervisor {what}", self.worker.unit()),
        )
        .with_label("generation", generation.to_string())
    }

    async fn run(self: Arc<Self>, ctx: SupervisorContext) {
        let Some((instance, worker)) = self.begin(&ctx) else {
            return;
        };
        let unit = self.worker.group();
        let generation = instance.generation;

        ctx.audit
            .record(self.lifecycle(Level::Info, "starting", generation))
            .await;
        info!(unit, generation, "supervisor started");

        let reason = tokio::select! {
            _ = ctx.parent.cancelled() => "shutdown",
            _ = instance.token.cancelled() => "stop requested",
            _ = instance.exited.cancelled() => "worker exited",
        };
        info!(unit, generation, reason, "supervisor stopping..");

        self.stop_instance(&instance);
        let exit = match worker.await {
            Ok(exit) => exit,
            Err(e) => WorkerExit::Panicked(e.to_string()),
        };

        let event = match exit.error() {
            None => self.lifecycle(Level::Info, "stopped", generation),
            Some(err) => {
                error!(unit, generation, error = err, "worker failed");
                self.lifecycle(Level::Error, "stopped", generation)
                    .with_label("error", err)
            }
        };
        ctx.audit.record(event).await;

        self.transition(generation, SupervisorState::Stopped);
        info!(unit, generation, "supervisor stopped");
    }

    async fn replace(self: Arc<Self>, ctx: SupervisorContext, old: Option<Instance>) {
        let unit = self.worker.group();
        let generation = old.as_ref().map_or(0, |i| i.generation);
        ctx.audit
            .record(self.lifecycle(Level::Info, "restarting", generation))
            .await;

        if let Some(old) = &old {
            self.stop_instance(old);
            if time::timeout(self.restart_grace, old.exited.cancelled())
                .await
                .is_err()
            {
                warn!(
                    unit,
                    generation,
                    grace = ?self.restart_grace,
                    "previous worker still running after grace; restarting anyway"
                );
            }
        }

        if ctx.parent.is_cancelled() {
            info!(unit, "restart abandoned: shutdown in progress");
            return;
        }
        let _ = self.start(ctx);
    }
}

impl<W: Worker> Supervisor for UnitSupervisor<W> {
    fn group(&self) -> &'static str {
        self.worker.group()
    }

    fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    fn start(self: Arc<Self>, ctx: SupervisorContext) -> JoinHandle<()> {
        let tracker = ctx.tracker.clone();
        tracker.spawn(self.run(ctx))
    }

    fn stop(&self) {
        let current = self.lock().instance.clone();
        match current {
            Some(instance) => self.stop_instance(&instance),
            None => debug!(unit = self.worker.group(), "stop ignored: never started"),
        }
    }

    fn restart(self: Arc<Self>) -> Result<(), SupervisorError> {
        let unit = self.worker.group();
        let (ctx, old) = {
            let inner = self.lock();
            let ctx = inner
                .ctx
                .clone()
                .ok_or(SupervisorError::NotStarted { unit })?;
            (ctx, inner.instance.clone())
        };
        if ctx.parent.is_cancelled() {
            return Err(SupervisorError::ShuttingDown { unit });
        }

        info!(unit, "restart requested");
        let tracker = ctx.tracker.clone();
        tracker.spawn(self.replace(ctx, old));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditQueue, AuditRecorder};
    use crate::audit::queue::tests::MemorySink;
    use crate::error::WorkerError;
    use async_trait::async_trait;
    use tokio_util::task::TaskTracker;

    const POLL: Duration = Duration::from_millis(20);

    /// Steps every `POLL` until cancelled; optionally fails or ignores the token.
    struct TestWorker {
        mode: Mode,
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Cooperative,
        /// Looks at the token only between sleeps of this length.
        Polling(Duration),
        FailAfterStep,
        Panic,
        /// Ignores cancellation for this long.
        Stubborn(Duration),
    }

    #[async_trait]
    impl Worker for TestWorker {
        fn group(&self) -> &'static str {
            "TEST-SUPERVISOR"
        }

        fn unit(&self) -> &'static str {
            "Test"
        }

        async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
            match self.mode {
                Mode::Cooperative => {
                    while !token.is_cancelled() {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = time::sleep(POLL) => {}
                        }
                    }
                    Ok(())
                }
                Mode::Polling(poll) => {
                    while !token.is_cancelled() {
                        time::sleep(poll).await;
                    }
                    Ok(())
                }
                Mode::FailAfterStep => {
                    time::sleep(POLL).await;
                    Err(WorkerError::Failed {
                        error: "backend unreachable".into(),
                    })
                }
                Mode::Panic => panic!("worker blew up"),
                Mode::Stubborn(d) => {
                    time::sleep(d).await;
                    Ok(())
                }
            }
        }
    }

    struct Harness {
        sup: Arc<UnitSupervisor<TestWorker>>,
        ctx: SupervisorContext,
        queue: Arc<AuditQueue>,
    }

    impl Harness {
        fn new(mode: Mode, grace: Duration) -> Self {
            let queue = Arc::new(AuditQueue::new(100));
            let ctx = SupervisorContext::new(
                CancellationToken::new(),
                TaskTracker::new(),
                AuditRecorder::new(Arc::clone(&queue)),
            );
            Self {
                sup: UnitSupervisor::new(TestWorker { mode }, grace),
                ctx,
                queue,
            }
        }

        async fn messages(&self) -> Vec<String> {
            let sink = MemorySink::default();
            self.queue.drain_into(&sink).await.unwrap();
            sink.messages()
        }

        async fn events(&self) -> Vec<AuditEvent> {
            let sink = MemorySink::default();
            self.queue.drain_into(&sink).await.unwrap();
            sink.events.into_inner().unwrap()
        }

        async fn wait_state(&self, want: SupervisorState) {
            let mut rx = self.sup.subscribe_state();
            time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
                .await
                .unwrap_or_else(|_| panic!("state {want} not reached"))
                .unwrap();
        }

        async fn wait_generation(&self, want: u64) {
            time::timeout(Duration::from_secs(2), async {
                while self.sup.generation() < want {
                    time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap_or_else(|_| panic!("generation {want} not reached"));
        }
    }

    #[tokio::test]
    async fn test_stops_within_two_poll_periods_of_shutdown() {
        let poll = Duration::from_millis(250);
        let h = Harness::new(Mode::Polling(poll), Duration::from_millis(400));
        assert_eq!(h.sup.state(), SupervisorState::NotStarted);

        let handle = Arc::clone(&h.sup).start(h.ctx.clone());
        h.wait_state(SupervisorState::Running).await;

        let cancelled_at = time::Instant::now();
        h.ctx.parent.cancel();
        h.wait_state(SupervisorState::Stopped).await;
        let elapsed = cancelled_at.elapsed();
        assert!(elapsed <= poll * 2, "stopped after {elapsed:?}");

        handle.await.unwrap();
        assert_eq!(
            h.messages().await,
            vec!["Test Supervisor starting", "Test Supervisor stopped"]
        );
    }

    #[tokio::test]
    async fn test_tracker_waits_for_supervisor() {
        let h = Harness::new(Mode::Cooperative, Duration::from_millis(400));
        let _ = Arc::clone(&h.sup).start(h.ctx.clone());
        h.wait_state(SupervisorState::Running).await;

        h.ctx.tracker.close();
        let wait = h.ctx.tracker.wait();
        tokio::pin!(wait);
        assert!(time::timeout(POLL, &mut wait).await.is_err());

        h.ctx.parent.cancel();
        time::timeout(Duration::from_secs(1), wait).await.unwrap();
        assert_eq!(h.sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = Harness::new(Mode::Cooperative, Duration::from_millis(400));
        h.sup.stop(); // never started: ignored
        assert_eq!(h.sup.state(), SupervisorState::NotStarted);

        let handle = Arc::clone(&h.sup).start(h.ctx.clone());
        h.wait_state(SupervisorState::Running).await;

        h.sup.stop();
        h.sup.stop();
        handle.await.unwrap();
        assert_eq!(h.sup.state(), SupervisorState::Stopped);

        h.sup.stop();
        assert_eq!(h.sup.state(), SupervisorState::Stopped);

        let stopped = h
            .messages()
            .await
            .into_iter()
            .filter(|m| m == "Test Supervisor stopped")
            .count();
        assert_eq!(stopped, 1);
    }

    #[tokio::test]
    async fn test_second_start_is_refused() {
        let h = Harness::new(Mode::Cooperative, Duration::from_millis(400));
        let first = Arc::clone(&h.sup).start(h.ctx.clone());
        h.wait_state(SupervisorState::Running).await;

        Arc::clone(&h.sup).start(h.ctx.clone()).await.unwrap();
        assert_eq!(h.sup.generation(), 1);
        assert_eq!(h.sup.state(), SupervisorState::Running);

        h.ctx.parent.cancel();
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_uses_fresh_token() {
        let h = Harness::new(Mode::Cooperative, Duration::from_secs(5));
        let _ = Arc::clone(&h.sup).start(h.ctx.clone());
        h.wait_state(SupervisorState::Running).await;
        let old = h.sup.internal_token().unwrap();

        let begun = time::Instant::now();
        Arc::clone(&h.sup).restart().unwrap();
        h.wait_generation(2).await;
        h.wait_state(SupervisorState::Running).await;
        // The old worker's exit signal, not the grace, released the restart.
        assert!(begun.elapsed() < Duration::from_secs(1));

        let new = h.sup.internal_token().unwrap();
        assert!(old.is_cancelled());
        assert!(!new.is_cancelled());

        old.cancel();
        time::sleep(POLL * 2).await;
        assert!(!new.is_cancelled());
        assert_eq!(h.sup.state(), SupervisorState::Running);

        h.ctx.parent.cancel();
        h.ctx.tracker.close();
        time::timeout(Duration::from_secs(1), h.ctx.tracker.wait())
            .await
            .unwrap();
        assert_eq!(h.sup.state(), SupervisorState::Stopped);

        let events = h.events().await;
        let summary: Vec<(String, String)> = events
            .iter()
            .map(|e| (e.message.clone(), e.labels["generation"].clone()))
            .collect();
        assert!(summary.contains(&("Test Supervisor restarting".into(), "1".into())));
        assert!(summary.contains(&("Test Supervisor stopped".into(), "1".into())));
        assert!(summary.contains(&("Test Supervisor starting".into(), "2".into())));
        assert!(summary.contains(&("Test Supervisor stopped".into(), "2".into())));
    }

    #[tokio::test]
    async fn test_restart_falls_back_to_grace() {
        let h = Harness::new(
            Mode::Stubborn(Duration::from_millis(300)),
            Duration::from_millis(50),
        );
        let _ = Arc::clone(&h.sup).start(h.ctx.clone());
        h.wait_state(SupervisorState::Running).await;

        Arc::clone(&h.sup).restart().unwrap();
        h.wait_generation(2).await;
        assert_eq!(h.sup.state(), SupervisorState::Running);

        h.ctx.parent.cancel();
        h.ctx.tracker.close();
        time::timeout(Duration::from_secs(2), h.ctx.tracker.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restart_refusals() {
        let h = Harness::new(Mode::Cooperative, Duration::from_millis(400));
        assert_eq!(
            Arc::clone(&h.sup).restart(),
            Err(SupervisorError::NotStarted {
                unit: "TEST-SUPERVISOR"
            })
        );

        let handle = Arc::clone(&h.sup).start(h.ctx.clone());
        h.wait_state(SupervisorState::Running).await;
        h.ctx.parent.cancel();
        assert_eq!(
            Arc::clone(&h.sup).restart(),
            Err(SupervisorError::ShuttingDown {
                unit: "TEST-SUPERVISOR"
            })
        );
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_worker_records_error() {
        let h = Harness::new(Mode::FailAfterStep, Duration::from_millis(400));
        let handle = Arc::clone(&h.sup).start(h.ctx.clone());

        time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.sup.state(), SupervisorState::Stopped);

        let events = h.events().await;
        let stopped = events.last().unwrap();
        assert_eq!(stopped.level, Level::Error);
        assert_eq!(
            stopped.labels.get("error").map(String::as_str),
            Some("worker failed: backend unreachable")
        );
    }

    #[tokio::test]
    async fn test_panicking_worker_does_not_hang_start() {
        let h = Harness::new(Mode::Panic, Duration::from_millis(400));
        let handle = Arc::clone(&h.sup).start(h.ctx.clone());

        time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.sup.state(), SupervisorState::Stopped);

        let events = h.events().await;
        assert_eq!(events.last().unwrap().level, Level::Error);
    }
}
