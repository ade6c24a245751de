//! # Supervised units.
//!
//! - [`Supervisor`] lifecycle capability shared by every unit
//! - [`Worker`] the unit-specific body a supervisor runs
//! - [`UnitSupervisor`] generic implementation of the lifecycle over a worker
//! - [`KmsSupervisor`], [`CliApiSupervisor`] the two concrete units
//!
//! ```text
//! Daemon ──start(ctx)──► UnitSupervisor<W> ──spawn──► W::run(token)
//!   │                        │   ▲                        │
//!   │ root token ────────────┘   └──── exit signal ───────┘
//!   └─ tracker.wait() ◄── supervisor task completes after the worker exits
//! ```

mod cli_api;
mod kms;
mod supervisor;
mod unit;
mod worker;

pub use cli_api::{CliApiSupervisor, CliApiWorker, CLI_API_GROUP};
pub use kms::{KmsSupervisor, KmsWorker, KMS_GROUP};
pub use supervisor::{Supervisor, SupervisorContext, SupervisorState};
pub use unit::UnitSupervisor;
pub use worker::{Worker, WorkerExit};
