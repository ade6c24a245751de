//! # Worker abstraction and one-shot execution.
//!
//! A [`Worker`] is the unit-specific loop a supervisor runs. It receives the
//! instance's [`CancellationToken`] and must return promptly once it fires.
//!
//! [`run_worker`] executes one worker run:
//! ```text
//! worker.run(token) ──► Ok(())   ─► WorkerExit::Completed
//!                   ──► Err(e)   ─► WorkerExit::Failed(e)
//!                   ──► panic    ─► WorkerExit::Panicked(msg)   (caught)
//! always: `exited` token cancelled on return
//! ```

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

/// # Asynchronous, cancelable unit body.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use openkmsd::{Worker, WorkerError};
///
/// struct Idle;
///
/// #[async_trait]
/// impl Worker for Idle {
///     fn group(&self) -> &'static str { "IDLE-SUPERVISOR" }
///     fn unit(&self) -> &'static str { "Idle" }
///
///     async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
///         token.cancelled().await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Audit group, e.g. `KMS-SUPERVISOR`.
    fn group(&self) -> &'static str;

    /// Name used in audit messages, e.g. `KMS` in "KMS Supervisor starting".
    fn unit(&self) -> &'static str;

    /// Runs until `token` is cancelled or the work ends.
    async fn run(&self, token: CancellationToken) -> Result<(), WorkerError>;
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    Failed(String),
    Panicked(String),
}

impl WorkerExit {
    /// Error text for failed or panicked runs.
    pub fn error(&self) -> Option<&str> {
        match self {
            WorkerExit::Completed => None,
            WorkerExit::Failed(e) | WorkerExit::Panicked(e) => Some(e),
        }
    }
}

/// Runs `worker` once, signalling `exited` however the run ends.
pub(crate) async fn run_worker<W: Worker + ?Sized>(
    worker: &W,
    token: CancellationToken,
    exited: CancellationToken,
) -> WorkerExit {
    let _exited = exited.drop_guard();

    match AssertUnwindSafe(worker.run(token)).catch_unwind().await {
        Ok(Ok(())) => WorkerExit::Completed,
        Ok(Err(e)) => WorkerExit::Failed(e.to_string()),
        Err(panic_err) => {
            let any = &*panic_err;
            let info = if let Some(msg) = any.downcast_ref::<&'static str>() {
                (*msg).to_string()
            } else if let Some(msg) = any.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            };
            WorkerExit::Panicked(info)
        }
    }
}
