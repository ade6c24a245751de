//! # Audit sinks.
//!
//! [`AuditSink`] is the durable target a persistence round writes to.
//! [`FileSink`] is the only backend: a directory of timestamp-named files.
//!
//! ## File layout
//! ```text
//! <directory>/
//!   2026-10-16T09:30:00Z_audit.log    ◄── one file per persistence round
//!   2026-10-16T09:30:05Z_audit.log
//! ```
//!
//! ## Rules
//! - Files are opened create+append: an existing file (same second) is
//!   appended to, never truncated.
//! - One record per line, in the order given.
//! - The handle is flushed, synced and dropped at the end of each round.
//! - An I/O failure confirms no event of the batch (at-least-once on retry).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::audit::AuditEvent;
use crate::config::AuditFormat;
use crate::error::{AuditError, SinkError};

/// Durable storage target for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Appends `events` in order.
    ///
    /// On failure the returned [`SinkError::written`] tells how many leading
    /// events were durably written.
    async fn append(&self, events: &[AuditEvent]) -> Result<(), SinkError>;
}

/// Writes each persistence round into `<directory>/<RFC3339>_audit.log`.
#[derive(Debug, Clone)]
pub struct FileSink {
    directory: PathBuf,
    format: AuditFormat,
}

impl FileSink {
    pub fn new(directory: impl Into<PathBuf>, format: AuditFormat) -> Self {
        Self {
            directory: directory.into(),
            format,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name for a round started at `at`.
    pub fn file_name(at: DateTime<Utc>) -> String {
        format!("{}_audit.log", at.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    fn encode(&self, event: &AuditEvent) -> Result<String, AuditError> {
        let mut line = match self.format {
            AuditFormat::Text => event.to_line(),
            AuditFormat::Json => event.to_json()?,
        };
        line.push('\n');
        Ok(line)
    }
}

#[async_trait]
impl AuditSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn append(&self, events: &[AuditEvent]) -> Result<(), SinkError> {
        let mut buf = String::new();
        let mut encoded = 0;
        let mut encode_err = None;
        for event in events {
            match self.encode(event) {
                Ok(line) => {
                    buf.push_str(&line);
                    encoded += 1;
                }
                Err(e) => {
                    encode_err = Some(e);
                    break;
                }
            }
        }

        // I/O failures confirm nothing: the whole batch stays queued.
        let io = |e: std::io::Error| SinkError::after(0, e);

        fs::create_dir_all(&self.directory).await.map_err(io)?;
        let path = self.directory.join(Self::file_name(Utc::now()));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io)?;

        file.write_all(buf.as_bytes()).await.map_err(io)?;
        file.flush().await.map_err(io)?;
        file.sync_data().await.map_err(io)?;

        match encode_err {
            Some(e) => Err(SinkError::after(encoded, e)),
            None => Ok(()),
        }
    }
}
