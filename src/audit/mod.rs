//! Audit pipeline: events, bounded queue, sinks and the background persister.
//!
//! ## Contents
//! - [`AuditEvent`], [`Level`] immutable structured records
//! - [`AuditQueue`] bounded FIFO with backpressure, [`AuditRecorder`] producer handle
//! - [`AuditSink`] durable target, [`FileSink`] directory of timestamp-named files
//! - [`AuditPersister`] periodic and shutdown drains
//!
//! ## Wiring
//! ```text
//! Supervisors ── AuditRecorder::record ──► AuditQueue ──► AuditPersister ──► FileSink
//!   (many)        (waits while full)       (cap 100)      (every 5s and      (<ts>_audit.log)
//!                                                          on shutdown)
//! ```

mod event;
mod persister;
pub(crate) mod queue;
mod sink;

pub use event::{AuditEvent, Level, TOPIC_LIFECYCLE};
pub use persister::AuditPersister;
pub use queue::{AuditQueue, AuditRecorder, QueueClosed, DEFAULT_CAPACITY};
pub use sink::{AuditSink, FileSink};
