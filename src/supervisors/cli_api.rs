//! Control-surface (CLI API) unit.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::WorkerError;
use crate::supervisors::{UnitSupervisor, Worker};

/// Audit group of the control-surface unit.
pub const CLI_API_GROUP: &str = "CLI-API-SUPERVISOR";

/// Control-surface worker; idles until cancelled.
pub struct CliApiWorker {
    poll: Duration,
}

impl CliApiWorker {
    pub fn new(poll: Duration) -> Self {
        Self {
            poll: poll.max(Duration::from_millis(1)),
        }
    }
}

#[async_trait]
impl Worker for CliApiWorker {
    fn group(&self) -> &'static str {
        CLI_API_GROUP
    }

    fn unit(&self) -> &'static str {
        "CLI API"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let mut ticker = time::interval_at(time::Instant::now() + self.poll, self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => trace!(unit = CLI_API_GROUP, "heartbeat"),
            }
        }
        debug!(unit = CLI_API_GROUP, "worker exiting");
        Ok(())
    }
}

/// Supervisor of the control-surface unit.
pub type CliApiSupervisor = UnitSupervisor<CliApiWorker>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditQueue, AuditRecorder};
    use crate::audit::queue::tests::MemorySink;
    use crate::supervisors::{Supervisor, SupervisorContext, SupervisorState};
    use std::sync::Arc;
    use tokio_util::task::TaskTracker;

    #[tokio::test]
    async fn test_records_under_own_group() {
        let queue = Arc::new(AuditQueue::new(10));
        let ctx = SupervisorContext::new(
            CancellationToken::new(),
            TaskTracker::new(),
            AuditRecorder::new(Arc::clone(&queue)),
        );
        let sup = CliApiSupervisor::new(
            CliApiWorker::new(Duration::from_millis(10)),
            Duration::from_millis(400),
        );
        assert_eq!(sup.group(), CLI_API_GROUP);

        let handle = Arc::clone(&sup).start(ctx.clone());
        let mut state = sup.subscribe_state();
        state
            .wait_for(|s| *s == SupervisorState::Running)
            .await
            .unwrap();
        ctx.parent.cancel();
        handle.await.unwrap();

        let sink = MemorySink::default();
        queue.drain_into(&sink).await.unwrap();
        let events = sink.events.into_inner().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.group == CLI_API_GROUP));
        assert_eq!(events[0].message, "CLI API Supervisor starting");
        assert_eq!(events[1].message, "CLI API Supervisor stopped");
    }
}
