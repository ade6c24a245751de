//! # Daemon root: startup order and shutdown sequencing.
//!
//! The [`Daemon`] owns the configuration, the root [`CancellationToken`], the
//! supervisor [`TaskTracker`] and the audit pipeline.
//!
//! ## Run
//! ```text
//! run():
//!   1. persister ── tokio::spawn(persister.run(persist_token))     (first up)
//!   2. audit "Daemon starting"
//!   3. KmsSupervisor.start(ctx)                                     (always)
//!   4. CliApiSupervisor.start(ctx)                                  (if CLI.enabled)
//!   5. root.cancelled().await         ◄── signal listener / shutdown_token().cancel()
//!                                        (persister: round failures now fatal)
//!   6. tracker.close(); tracker.wait()   every unit (and restart) has stopped
//!   7. audit "Daemon stopped"
//!   8. persist_token.cancel() ─► final drain ─► persister result     (last down)
//! ```
//!
//! The persister has its own token so the units' "stopped" events, recorded
//! during step 6, are captured by the final drain. It also watches the root
//! token: if the sink fails after shutdown began, it closes the queue so
//! units blocked on a full queue can finish and step 6 completes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::audit::{AuditEvent, AuditPersister, AuditQueue, AuditRecorder, AuditSink, FileSink};
use crate::config::{AuditBackend, DaemonConfig, RuntimeConfig};
use crate::error::DaemonError;
use crate::supervisors::{
    CliApiSupervisor, CliApiWorker, KmsSupervisor, KmsWorker, Supervisor, SupervisorContext,
};

/// Audit group of the daemon root's own events.
pub const DAEMON_GROUP: &str = "DAEMON";

/// Process-wide owner of the supervised units and the audit pipeline.
pub struct Daemon {
    config: Arc<DaemonConfig>,
    runtime: RuntimeConfig,
    root: CancellationToken,
    tracker: TaskTracker,
    sink: Option<Arc<dyn AuditSink>>,
    kms: Arc<KmsSupervisor>,
    cli_api: Option<Arc<CliApiSupervisor>>,
}

impl Daemon {
    /// Builds a daemon with default [`RuntimeConfig`].
    ///
    /// # Errors
    /// [`DaemonError::UnsupportedAuditType`] / [`DaemonError::UnsupportedAuditFormat`]
    /// when auditing is enabled with an unknown backend or encoding.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        Self::with_runtime(config, RuntimeConfig::default())
    }

    /// Builds a daemon with explicit timings.
    pub fn with_runtime(config: DaemonConfig, runtime: RuntimeConfig) -> Result<Self, DaemonError> {
        let sink: Option<Arc<dyn AuditSink>> = if config.auditing.enabled {
            let format = config.auditing.format()?;
            match config.auditing.backend()? {
                AuditBackend::File => Some(Arc::new(FileSink::new(
                    config.auditing.storage.directory.clone(),
                    format,
                ))),
            }
        } else {
            None
        };

        let kms = KmsSupervisor::new(KmsWorker::new(runtime.poll_interval), runtime.restart_grace);
        let cli_api = config.cli.enabled.then(|| {
            CliApiSupervisor::new(
                CliApiWorker::new(runtime.poll_interval),
                runtime.restart_grace,
            )
        });

        Ok(Self {
            config: Arc::new(config),
            runtime,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            sink,
            kms,
            cli_api,
        })
    }

    /// Root token; cancelling it shuts the daemon down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Key-management unit.
    pub fn kms(&self) -> Arc<KmsSupervisor> {
        Arc::clone(&self.kms)
    }

    /// Control-surface unit, if enabled.
    pub fn cli_api(&self) -> Option<Arc<CliApiSupervisor>> {
        self.cli_api.clone()
    }

    /// Runs until the root token is cancelled and everything has stopped.
    ///
    /// # Errors
    /// Returns [`DaemonError::Audit`] when the final audit drain fails and
    /// [`DaemonError::PersisterTask`] when the persister task panicked.
    pub async fn run(self) -> Result<(), DaemonError> {
        let persist_token = CancellationToken::new();
        let (recorder, persister) = match &self.sink {
            Some(sink) => {
                let queue = Arc::new(AuditQueue::new(self.runtime.queue_capacity));
                let persister = AuditPersister::new(
                    Arc::clone(&queue),
                    Arc::clone(sink),
                    self.runtime.persist_interval,
                )
                .with_shutdown(self.root.clone());
                info!(
                    sink = sink.name(),
                    directory = %self.config.auditing.storage.directory.display(),
                    capacity = queue.capacity(),
                    "audit enabled"
                );
                (
                    AuditRecorder::new(queue),
                    Some(tokio::spawn(persister.run(persist_token.clone()))),
                )
            }
            None => {
                info!("audit disabled");
                (AuditRecorder::disabled(), None)
            }
        };

        recorder
            .record(AuditEvent::lifecycle(DAEMON_GROUP, "Daemon starting"))
            .await;

        let ctx = SupervisorContext::new(self.root.clone(), self.tracker.clone(), recorder.clone());
        let _ = Arc::clone(&self.kms).start(ctx.clone());
        if let Some(cli_api) = &self.cli_api {
            let _ = Arc::clone(cli_api).start(ctx);
        } else {
            debug!("CLI API disabled");
        }
        info!("daemon started");

        self.root.cancelled().await;
        info!("shutdown requested, waiting for units..");

        self.tracker.close();
        self.tracker.wait().await;

        recorder
            .record(AuditEvent::lifecycle(DAEMON_GROUP, "Daemon stopped"))
            .await;

        persist_token.cancel();
        if let Some(persister) = persister {
            persister.await.map_err(DaemonError::PersisterTask)??;
        }
        info!("daemon stopped");
        Ok(())
    }
}
