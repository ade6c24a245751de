//! Key-management unit.
//!
//! The worker holds no key material yet: it idles until its token fires and
//! emits a heartbeat trace every `poll` so a stuck unit shows up in logs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::WorkerError;
use crate::supervisors::{UnitSupervisor, Worker};

/// Audit group of the key-management unit.
pub const KMS_GROUP: &str = "KMS-SUPERVISOR";

/// Key-management worker.
pub struct KmsWorker {
    poll: Duration,
}

impl KmsWorker {
    pub fn new(poll: Duration) -> Self {
        Self {
            poll: poll.max(Duration::from_millis(1)),
        }
    }
}

#[async_trait]
impl Worker for KmsWorker {
    fn group(&self) -> &'static str {
        KMS_GROUP
    }

    fn unit(&self) -> &'static str {
        "KMS"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let mut ticker = time::interval_at(time::Instant::now() + self.poll, self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => trace!(unit = KMS_GROUP, "heartbeat"),
            }
        }
        debug!(unit = KMS_GROUP, "worker exiting");
        Ok(())
    }
}

/// Supervisor of the key-management unit.
pub type KmsSupervisor = UnitSupervisor<KmsWorker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exits_promptly_on_cancel() {
        let worker = KmsWorker::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        let run = tokio::spawn({
            let token = token.clone();
            async move { worker.run(token).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!run.is_finished());

        token.cancel();
        let res = time::timeout(Duration::from_millis(100), run)
            .await
            .expect("worker must not wait for the next tick")
            .unwrap();
        assert!(res.is_ok());
    }
}
