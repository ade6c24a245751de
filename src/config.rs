//! # Daemon configuration.
//!
//! Two layers:
//! 1. [`DaemonConfig`] the operator-facing YAML file, loaded once at startup and
//!    shared read-only as `Arc<DaemonConfig>`.
//! 2. [`RuntimeConfig`] code-level timings (poll periods, grace, queue capacity).
//!
//! ## Recognized keys
//! ```text
//! CLI:
//!   enabled: true             # start the control-surface unit
//! Auditing:
//!   enabled: true             # build the audit pipeline
//!   type: file                # only "file" is supported
//!   format: text              # "text" (default) or "json"
//!   storage:
//!     directory: /var/log/openkms/audit
//! KMS: {}                     # reserved
//! ```
//!
//! Every section is optional; absent sections take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::DaemonError;

/// Environment variable overriding the configuration path.
pub const CONFIG_PATH_ENV: &str = "OPENKMS_CONFIG_PATH";

/// Configuration path used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hyperplane/openkms/configs/openkms.yaml";

const DEFAULT_AUDIT_DIRECTORY: &str = "/var/log/openkms/audit";

/// Top-level daemon configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(rename = "CLI")]
    pub cli: CliConfig,
    #[serde(rename = "Auditing")]
    pub auditing: AuditingConfig,
    #[serde(rename = "KMS")]
    pub kms: KmsConfig,
}

/// Control-surface unit settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    pub enabled: bool,
}

/// Audit pipeline settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditingConfig {
    pub enabled: bool,
    /// Backend selector; validated by [`AuditingConfig::backend`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Line encoding; validated by [`AuditingConfig::format`].
    pub format: Option<String>,
    pub storage: StorageConfig,
}

impl Default for AuditingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: AuditBackend::File.as_str().to_string(),
            format: None,
            storage: StorageConfig::default(),
        }
    }
}

/// Where the file backend writes.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_AUDIT_DIRECTORY),
        }
    }
}

/// Key-management unit settings (reserved).
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct KmsConfig {}

/// Supported audit backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditBackend {
    /// A directory of timestamp-named log files.
    File,
}

impl AuditBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditBackend::File => "file",
        }
    }
}

/// Encoding of one persisted audit record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuditFormat {
    /// `[ts] [LEVEL] [GROUP] [TOPIC] message Labels: map[..]`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl AuditingConfig {
    /// Resolves `type` into a backend.
    ///
    /// # Errors
    /// [`DaemonError::UnsupportedAuditType`] for anything but `"file"`.
    pub fn backend(&self) -> Result<AuditBackend, DaemonError> {
        match self.kind.as_str() {
            "file" => Ok(AuditBackend::File),
            other => Err(DaemonError::UnsupportedAuditType(other.to_string())),
        }
    }

    /// Resolves `format` into an encoding (absent means text).
    ///
    /// # Errors
    /// [`DaemonError::UnsupportedAuditFormat`] for unknown values.
    pub fn format(&self) -> Result<AuditFormat, DaemonError> {
        match self.format.as_deref() {
            None | Some("text") => Ok(AuditFormat::Text),
            Some("json") => Ok(AuditFormat::Json),
            Some(other) => Err(DaemonError::UnsupportedAuditFormat(other.to_string())),
        }
    }
}

impl DaemonConfig {
    /// Parses a configuration document.
    ///
    /// `path` is only used for error reporting.
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, DaemonError> {
        serde_yaml::from_str(content).map_err(|source| DaemonError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let content = std::fs::read_to_string(path).map_err(|source| DaemonError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content, path)
    }
}

/// Returns the configuration path: [`CONFIG_PATH_ENV`] if set, else [`DEFAULT_CONFIG_PATH`].
pub fn config_path() -> PathBuf {
    resolve_config_path(std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
}

fn resolve_config_path(env: Option<PathBuf>) -> PathBuf {
    env.filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Timings and sizes of the runtime.
///
/// ## Field semantics
/// - `poll_interval`: worker step period; bounds stop latency of a unit
/// - `restart_grace`: upper bound a restart waits for the old worker to exit
/// - `persist_interval`: period of regular audit drains
/// - `queue_capacity`: audit queue slots ([`AuditQueue::new`](crate::audit::AuditQueue::new) raises 0 to 1)
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Period of one worker step.
    pub poll_interval: Duration,

    /// Maximum wait for a superseded worker during restart.
    ///
    /// The restart proceeds as soon as the old worker signals exit; this is
    /// only the fallback when it does not.
    pub restart_grace: Duration,

    /// Period of regular audit persistence rounds.
    pub persist_interval: Duration,

    /// Capacity of the audit queue.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    /// - `poll_interval = 1s`
    /// - `restart_grace = 400ms`
    /// - `persist_interval = 5s`
    /// - `queue_capacity = 100`
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            restart_grace: Duration::from_millis(400),
            persist_interval: Duration::from_secs(5),
            queue_capacity: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: &str) -> Result<DaemonConfig, DaemonError> {
        DaemonConfig::from_yaml(doc, Path::new("test.yaml"))
    }

    #[test]
    fn test_full_document() {
        let cfg = parse(
            r#"
CLI:
  enabled: true
Auditing:
  enabled: true
  type: file
  format: json
  storage:
    directory: /tmp/audit
KMS: {}
"#,
        )
        .unwrap();

        assert!(cfg.cli.enabled);
        assert!(cfg.auditing.enabled);
        assert_eq!(cfg.auditing.backend().unwrap(), AuditBackend::File);
        assert_eq!(cfg.auditing.format().unwrap(), AuditFormat::Json);
        assert_eq!(cfg.auditing.storage.directory, PathBuf::from("/tmp/audit"));
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let cfg = parse("CLI:\n  enabled: false\n").unwrap();
        assert_eq!(cfg.auditing, AuditingConfig::default());
        assert_eq!(cfg.auditing.format().unwrap(), AuditFormat::Text);
        assert_eq!(cfg.kms, KmsConfig {});
    }

    #[test]
    fn test_unsupported_type_is_rejected() {
        let cfg = parse("Auditing:\n  enabled: true\n  type: s3\n").unwrap();
        let err = cfg.auditing.backend().unwrap_err();
        assert!(matches!(err, DaemonError::UnsupportedAuditType(ref t) if t == "s3"));
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let cfg = parse("Auditing:\n  format: xml\n").unwrap();
        assert!(matches!(
            cfg.auditing.format(),
            Err(DaemonError::UnsupportedAuditFormat(_))
        ));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = parse("CLI: [unterminated").unwrap_err();
        assert_eq!(err.as_label(), "daemon_config_parse");
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonConfig::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, DaemonError::ConfigRead { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openkms.yaml");
        std::fs::write(&path, "CLI:\n  enabled: true\n").unwrap();
        assert!(DaemonConfig::load(&path).unwrap().cli.enabled);
    }

    #[test]
    fn test_config_path_resolution() {
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
        assert_eq!(
            resolve_config_path(Some(PathBuf::new())),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
        assert_eq!(
            resolve_config_path(Some(PathBuf::from("/opt/kms.yaml"))),
            PathBuf::from("/opt/kms.yaml")
        );
    }

    #[test]
    fn test_runtime_defaults() {
        let rt = RuntimeConfig::default();
        assert_eq!(rt.restart_grace, Duration::from_millis(400));
        assert_eq!(rt.queue_capacity, 100);
    }
}
