//! Error types used by the daemon root, the audit pipeline and supervisors.
//!
//! - [`DaemonError`] startup and process-level failures (exit code 1).
//! - [`AuditError`] failures of the audit pipeline (sink I/O, encoding, final drain).
//! - [`SinkError`] a partial write reported by an [`AuditSink`](crate::audit::AuditSink).
//! - [`SupervisorError`] refusals of supervisor control operations.
//! - [`WorkerError`] failures reported by a unit's worker.
//!
//! Every enum provides `as_label` for logs.

use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by the daemon root.
///
/// All of these are fatal: the binary logs them once and exits with code 1.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration file missing or unreadable.
    #[error("failed to read configuration {path:?}: {source}")]
    ConfigRead {
        /// Path that was read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for [`DaemonConfig`](crate::DaemonConfig).
    #[error("failed to parse configuration {path:?}: {source}")]
    ConfigParse {
        /// Path that was parsed.
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `Auditing.type` names a backend that does not exist.
    #[error("unsupported audit type {0:?} (supported: \"file\")")]
    UnsupportedAuditType(String),

    /// `Auditing.format` names an encoding that does not exist.
    #[error("unsupported audit format {0:?} (supported: \"text\", \"json\")")]
    UnsupportedAuditFormat(String),

    /// The audit pipeline failed in a way that cannot be retried.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The persister task panicked or was aborted.
    #[error("audit persister task failed: {0}")]
    PersisterTask(#[source] tokio::task::JoinError),
}

impl DaemonError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use openkmsd::DaemonError;
    ///
    /// let err = DaemonError::UnsupportedAuditType("s3".into());
    /// assert_eq!(err.as_label(), "daemon_unsupported_audit_type");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            DaemonError::ConfigRead { .. } => "daemon_config_read",
            DaemonError::ConfigParse { .. } => "daemon_config_parse",
            DaemonError::UnsupportedAuditType(_) => "daemon_unsupported_audit_type",
            DaemonError::UnsupportedAuditFormat(_) => "daemon_unsupported_audit_format",
            DaemonError::Audit(e) => e.as_label(),
            DaemonError::PersisterTask(_) => "daemon_persister_task",
        }
    }
}

/// # Errors produced by the audit pipeline.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AuditError {
    /// Sink I/O failed.
    #[error("audit i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be encoded as JSON.
    #[error("audit encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The final drain on shutdown could not persist every buffered event.
    #[error("final audit drain failed with {pending} event(s) pending: {source}")]
    ShutdownDrain {
        /// Events still in the queue when the drain gave up.
        pending: usize,
        #[source]
        source: Box<AuditError>,
    },
}

impl AuditError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            AuditError::Io(_) => "audit_io",
            AuditError::Encode(_) => "audit_encode",
            AuditError::ShutdownDrain { .. } => "audit_shutdown_drain",
        }
    }
}

/// A sink write that stopped part-way through a batch.
///
/// `written` leading events reached the sink; the rest did not.
#[derive(Error, Debug)]
#[error("sink wrote {written} event(s) before failing: {source}")]
pub struct SinkError {
    /// Number of leading events that were written.
    pub written: usize,
    #[source]
    pub source: AuditError,
}

impl SinkError {
    /// Wraps `source` as a failure after `written` events.
    pub fn after(written: usize, source: impl Into<AuditError>) -> Self {
        Self {
            written,
            source: source.into(),
        }
    }
}

/// # Refusals of supervisor control operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorError {
    /// The unit was never started, so there is no context to restart into.
    #[error("supervisor {unit} has not been started")]
    NotStarted {
        /// Audit group of the unit.
        unit: &'static str,
    },

    /// The parent token is already cancelled.
    #[error("supervisor {unit} is shutting down")]
    ShuttingDown {
        /// Audit group of the unit.
        unit: &'static str,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::NotStarted { .. } => "supervisor_not_started",
            SupervisorError::ShuttingDown { .. } => "supervisor_shutting_down",
        }
    }
}

/// # Errors returned by a [`Worker`](crate::Worker) run.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The worker's own work failed; the unit stops.
    #[error("worker failed: {error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Failed { .. } => "worker_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(
            DaemonError::UnsupportedAuditFormat("xml".into()).as_label(),
            "daemon_unsupported_audit_format"
        );
        assert_eq!(
            SupervisorError::NotStarted { unit: "KMS-SUPERVISOR" }.as_label(),
            "supervisor_not_started"
        );
        let drain = AuditError::ShutdownDrain {
            pending: 3,
            source: Box::new(AuditError::Io(std::io::Error::other("gone"))),
        };
        assert_eq!(drain.as_label(), "audit_shutdown_drain");
        assert_eq!(DaemonError::from(drain).as_label(), "audit_shutdown_drain");
    }

    #[test]
    fn test_shutdown_drain_display() {
        let drain = AuditError::ShutdownDrain {
            pending: 1,
            source: Box::new(AuditError::Io(std::io::Error::other("gone"))),
        };
        assert!(drain.to_string().contains("1 event(s) pending"));
    }

    #[test]
    fn test_sink_error_display() {
        let err = SinkError::after(2, std::io::Error::other("disk full"));
        assert_eq!(err.written, 2);
        assert_eq!(
            err.to_string(),
            "sink wrote 2 event(s) before failing: audit i/o failed: disk full"
        );
    }
}
