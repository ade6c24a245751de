//! # Supervisor capability.
//!
//! A [`Supervisor`] owns one subsystem's lifecycle: start, stop, restart. Every
//! concrete unit shares the contract; the daemon only sees `Arc<dyn Supervisor>`.
//!
//! ## State machine
//! ```text
//! NotStarted ──start──► Running ──token cancelled──► Stopping ──worker exited──► Stopped
//!                          ▲                                                        │
//!                          └──────────────── restart (new token, new generation) ───┘
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::audit::AuditRecorder;
use crate::error::SupervisorError;

/// Lifecycle state of a supervised unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl SupervisorState {
    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorState::NotStarted => "not_started",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a supervisor is given when started.
///
/// - `parent`: the daemon's root token; cancellation means shut down
/// - `tracker`: completion tracker the daemon waits on
/// - `audit`: where lifecycle events go
#[derive(Clone)]
pub struct SupervisorContext {
    pub parent: CancellationToken,
    pub tracker: TaskTracker,
    pub audit: AuditRecorder,
}

impl SupervisorContext {
    pub fn new(parent: CancellationToken, tracker: TaskTracker, audit: AuditRecorder) -> Self {
        Self {
            parent,
            tracker,
            audit,
        }
    }
}

/// Lifecycle owner of one supervised unit.
pub trait Supervisor: Send + Sync + 'static {
    /// Audit group of the unit, e.g. `KMS-SUPERVISOR`.
    fn group(&self) -> &'static str;

    /// Current state.
    fn state(&self) -> SupervisorState;

    /// Starts a new instance as a task registered on `ctx.tracker`.
    ///
    /// The task launches the worker, records a "starting" event, waits for
    /// the parent token (or a direct [`stop`](Self::stop)), then stops the
    /// worker, waits for it to exit and records a "stopped" event. It never
    /// completes before the worker has exited.
    fn start(self: Arc<Self>, ctx: SupervisorContext) -> JoinHandle<()>;

    /// Cancels the current instance's token. Non-blocking and idempotent.
    fn stop(&self);

    /// Replaces the current instance with a fresh one without blocking.
    ///
    /// # Errors
    /// - [`SupervisorError::NotStarted`] if the unit was never started
    /// - [`SupervisorError::ShuttingDown`] if the parent token is cancelled
    fn restart(self: Arc<Self>) -> Result<(), SupervisorError>;
}
