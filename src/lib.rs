//! # openkmsd
//!
//! **openkmsd** is the OpenKMS daemon core: a process root that starts a small
//! set of supervised units, records their lifecycle into an audit trail, and
//! shuts everything down in a fixed order when asked to.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                 ┌──────────────────────────────┐
//!  SIGINT/TERM ──►│  Daemon (root token, tracker)│◄── DaemonConfig (YAML)
//!                 └──────┬───────────────┬───────┘
//!          start(ctx)    │               │ start(ctx) if CLI.enabled
//!                        ▼               ▼
//!              ┌──────────────────┐  ┌──────────────────┐
//!              │  KmsSupervisor   │  │ CliApiSupervisor │
//!              │ (UnitSupervisor) │  │ (UnitSupervisor) │
//!              └──┬───────────┬───┘  └──┬───────────┬───┘
//!                 │ spawn     │ record  │ spawn     │ record
//!                 ▼           │         ▼           │
//!             KmsWorker       │     CliApiWorker    │
//!                             ▼                     ▼
//!                 ┌───────────────────────────────────────┐
//!                 │  AuditQueue (bounded FIFO, cap 100)   │
//!                 └───────────────────┬───────────────────┘
//!                                     ▼
//!                           AuditPersister (every 5s + final drain)
//!                                     ▼
//!                           FileSink  <RFC3339>_audit.log
//! ```
//!
//! ### Shutdown
//! ```text
//! root.cancel()
//!   ├─► every unit: cancel instance token ─► await worker ─► audit "stopped"
//!   ├─► tracker.wait()                       (all units and restarts done)
//!   ├─► audit "Daemon stopped"
//!   └─► persister: drain to fixed point ─► close queue
//!          └─ failure ─► DaemonError::Audit ─► exit code 1
//! ```
//!
//! ## Features
//! | Area            | Description                                          | Key types / traits                    |
//! |-----------------|------------------------------------------------------|---------------------------------------|
//! | **Supervision** | Start/stop/restart with a shared state machine.      | [`Supervisor`], [`Worker`]            |
//! | **Audit**       | Bounded queue with backpressure, durable file sink.  | [`AuditEvent`], [`AuditSink`]         |
//! | **Daemon**      | Startup order and shutdown sequencing.               | [`Daemon`]                            |
//! | **Errors**      | Typed errors with stable labels.                     | [`DaemonError`], [`SupervisorError`]  |
//! | **Configuration** | YAML daemon config and runtime timings.            | [`DaemonConfig`], [`RuntimeConfig`]   |
//!
//! ## Example
//! ```rust
//! use std::path::Path;
//! use std::time::Duration;
//! use openkmsd::{Daemon, DaemonConfig, RuntimeConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), openkmsd::DaemonError> {
//!     let config = DaemonConfig::from_yaml("CLI:\n  enabled: true\n", Path::new("inline"))?;
//!     let runtime = RuntimeConfig {
//!         poll_interval: Duration::from_millis(10),
//!         ..RuntimeConfig::default()
//!     };
//!
//!     let daemon = Daemon::with_runtime(config, runtime)?;
//!     daemon.shutdown_token().cancel();
//!     daemon.run().await
//! }
//! ```

pub mod audit;
pub mod config;
mod daemon;
mod error;
pub mod shutdown;
pub mod supervisors;

// ---- Public re-exports ----

pub use audit::{AuditEvent, AuditRecorder, AuditSink, Level};
pub use config::{DaemonConfig, RuntimeConfig};
pub use daemon::{Daemon, DAEMON_GROUP};
pub use error::{AuditError, DaemonError, SinkError, SupervisorError, WorkerError};
pub use supervisors::{Supervisor, SupervisorState, Worker};
