//! # Audit events.
//!
//! An [`AuditEvent`] is an immutable record of something an operator may need to
//! reconstruct later: a unit starting, stopping, restarting, failing.
//!
//! ## Encodings
//! ```text
//! text: [2026-10-16T09:30:00Z] [INFO] [KMS-SUPERVISOR] [LIFECYCLE] KMS Supervisor starting Labels: map[generation:1]
//! json: {"timestamp":"2026-10-16T09:30:00Z","level":"INFO","group":"KMS-SUPERVISOR",...}
//! ```
//!
//! ## Example
//! ```rust
//! use openkmsd::audit::{AuditEvent, Level, TOPIC_LIFECYCLE};
//!
//! let ev = AuditEvent::new(Level::Warn, "KMS-SUPERVISOR", TOPIC_LIFECYCLE, "slow stop")
//!     .with_label("generation", "2");
//!
//! assert_eq!(ev.level, Level::Warn);
//! assert_eq!(ev.labels.get("generation").map(String::as_str), Some("2"));
//! assert!(ev.to_line().ends_with("slow stop Labels: map[generation:2]"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Topic for start/stop/restart records.
pub const TOPIC_LIFECYCLE: &str = "LIFECYCLE";

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable structured audit record.
///
/// - `timestamp`: wall-clock creation time (UTC)
/// - `group`: emitting component, e.g. `KMS-SUPERVISOR`
/// - `topic`: free-form category, e.g. [`TOPIC_LIFECYCLE`]
/// - `labels`: extra key/value context; keys kept sorted for stable output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub group: String,
    pub topic: String,
    pub message: String,
    pub labels: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Creates an event stamped with the current time and no labels.
    pub fn new(
        level: Level,
        group: impl Into<String>,
        topic: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            group: group.into(),
            topic: topic.into(),
            message: message.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Shorthand for an `INFO` lifecycle event.
    #[inline]
    pub fn lifecycle(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Info, group, TOPIC_LIFECYCLE, message)
    }

    /// Attaches one label (replaces an existing value for the same key).
    #[inline]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Attaches every label from `labels`.
    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Renders the text encoding (no trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "[{}] [{}] [{}] [{}] {} Labels: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.level,
            self.group,
            self.topic,
            self.message,
            LabelsDisplay(&self.labels),
        )
    }

    /// Renders the JSON encoding (no trailing newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// `map[k1:v1 k2:v2]`
struct LabelsDisplay<'a>(&'a BTreeMap<String, String>);

impl fmt::Display for LabelsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("map[")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("]")
    }
}
