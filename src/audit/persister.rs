//! # Audit persister: background drain of the queue into the sink.
//!
//! ## Loop
//! ```text
//! loop {
//!   select! {
//!     token.cancelled()     ─► final drain ─► return
//!     shutdown.cancelled()  ─► strict round (once; later ticks are strict too)
//!     ticker.tick()         ─► drain_into(sink)
//!                                 ├─ Ok(n)  ─► debug
//!                                 └─ Err(e) ─► regular: warn, retry next tick
//!                                              strict:  close queue ─► ShutdownDrain
//!   }
//! }
//!
//! final drain:
//!   drain until a pass finds the queue empty and no producer holds a slot
//!   close the queue (later pushes fail and are logged, never stranded)
//!   drain once more (pushes that raced the close)
//!   any failure ─► AuditError::ShutdownDrain { pending }
//! ```
//!
//! Once `shutdown` fires there is no later chance to retry, so a failed round
//! closes the queue: producers blocked on a full queue are released instead of
//! holding the daemon's shutdown open forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditQueue, AuditSink};
use crate::error::{AuditError, SinkError};

/// Drains an [`AuditQueue`] into an [`AuditSink`] periodically and on shutdown.
pub struct AuditPersister {
    queue: Arc<AuditQueue>,
    sink: Arc<dyn AuditSink>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl AuditPersister {
    /// `interval` is clamped to at least 1ms.
    pub fn new(queue: Arc<AuditQueue>, sink: Arc<dyn AuditSink>, interval: Duration) -> Self {
        Self {
            queue,
            sink,
            interval: interval.max(Duration::from_millis(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Makes round failures fatal once `shutdown` is cancelled.
    ///
    /// The daemon passes its root token here; the token given to
    /// [`run`](Self::run) is cancelled later, after every unit has stopped.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs until `token` is cancelled, then performs the final drain.
    ///
    /// # Errors
    /// [`AuditError::ShutdownDrain`] if a round after shutdown or the final
    /// drain cannot persist every buffered event. Failures of regular rounds
    /// are logged and retried.
    pub async fn run(self, token: CancellationToken) -> Result<(), AuditError> {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut strict = false;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.shutdown.cancelled(), if !strict => {
                    strict = true;
                    debug!(sink = self.sink.name(), "shutdown started; round failures are fatal");
                    self.strict_round().await?;
                }
                _ = ticker.tick() => {
                    if strict {
                        self.strict_round().await?;
                    } else {
                        self.round().await;
                    }
                }
            }
        }

        self.final_drain().await
    }

    async fn round(&self) {
        match self.queue.drain_into(self.sink.as_ref()).await {
            Ok(0) => {}
            Ok(n) => debug!(sink = self.sink.name(), persisted = n, "audit round"),
            Err(e) => warn!(
                sink = self.sink.name(),
                persisted = e.written,
                pending = self.queue.len(),
                error = %e.source,
                "audit round failed; retrying next round"
            ),
        }
    }

    async fn strict_round(&self) -> Result<(), AuditError> {
        match self.queue.drain_into(self.sink.as_ref()).await {
            Ok(n) => {
                if n > 0 {
                    debug!(sink = self.sink.name(), persisted = n, "audit round");
                }
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn final_drain(&self) -> Result<(), AuditError> {
        let mut total = 0;
        loop {
            match self.queue.drain_into(self.sink.as_ref()).await {
                Ok(0) if self.queue.admitting() == 0 => break,
                Ok(n) => {
                    total += n;
                    // Producers holding a freed slot push before the
                    // emptiness check is repeated.
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.queue.close();
        match self.queue.drain_into(self.sink.as_ref()).await {
            Ok(n) => total += n,
            Err(e) => return Err(self.fail(e)),
        }

        info!(sink = self.sink.name(), persisted = total, "audit queue drained");
        Ok(())
    }

    fn fail(&self, e: SinkError) -> AuditError {
        self.queue.close();
        let pending = self.queue.len();
        error!(
            sink = self.sink.name(),
            pending,
            error = %e.source,
            "audit drain failed during shutdown"
        );
        AuditError::ShutdownDrain {
            pending,
            source: Box::new(e.source),
        }
    }
}
