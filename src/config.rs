//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Upper bound for `session_retention_days` (one hundred years).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Upper bound for every second-valued age or interval (one hundred years).
pub const MAX_PERIOD_SECONDS: u64 = 100 * 365 * 86_400;

/// Deadlines applied to every store write.
///
/// Single-row status updates get the short deadline; claim and retention
/// statements that may touch many rows get the long one.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline for single-row status updates.
    #[serde(default = "default_status_update_ms")]
    pub status_update_ms: u64,
    /// Deadline for claim and multi-row retention statements.
    #[serde(default = "default_bulk_ms")]
    pub bulk_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            status_update_ms: default_status_update_ms(),
            bulk_ms: default_bulk_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Deadline for single-row writes.
    #[must_use]
    pub fn status_update(&self) -> Duration {
        Duration::from_millis(self.status_update_ms)
    }

    /// Deadline for multi-row writes.
    #[must_use]
    pub fn bulk(&self) -> Duration {
        Duration::from_millis(self.bulk_ms)
    }
}

fn default_status_update_ms() -> u64 {
    5_000
}

fn default_bulk_ms() -> u64 {
    30_000
}

/// Retention sweep configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetentionConfig {
    /// Days after completion (or submission, for never-claimed sessions)
    /// before a session is soft-deleted.
    #[serde(default = "default_session_retention_days")]
    pub session_retention_days: u32,
    /// Age after which ephemeral event rows are hard-deleted.
    #[serde(default = "default_event_ttl_seconds")]
    pub event_ttl_seconds: u64,
    /// Interval between sweeps.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            session_retention_days: default_session_retention_days(),
            event_ttl_seconds: default_event_ttl_seconds(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

fn default_session_retention_days() -> u32 {
    365
}

fn default_event_ttl_seconds() -> u64 {
    3_600
}

fn default_cleanup_interval_seconds() -> u64 {
    43_200
}

/// What the orphan monitor does with a session whose worker stopped heartbeating.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrphanAction {
    /// Log only; leave remediation to an operator.
    #[default]
    Report,
    /// Mark the session `timed_out`.
    Fail,
    /// Return the session to `pending` so another worker can claim it.
    Requeue,
}

/// Orphan detection configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrphanConfig {
    /// Heartbeat silence after which an `in_progress` session is orphaned.
    #[serde(default = "default_orphan_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Interval between orphan scans.
    #[serde(default = "default_orphan_check_interval_seconds")]
    pub check_interval_seconds: u64,
    /// Remediation applied to each detected orphan.
    #[serde(default)]
    pub action: OrphanAction,
}

impl Default for OrphanConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_orphan_timeout_seconds(),
            check_interval_seconds: default_orphan_check_interval_seconds(),
            action: OrphanAction::default(),
        }
    }
}

fn default_orphan_timeout_seconds() -> u64 {
    300
}

fn default_orphan_check_interval_seconds() -> u64 {
    60
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path of the shared `SQLite` database file.
    pub database_path: PathBuf,
    /// Identifier this worker writes into `session.pod_id` when claiming.
    #[serde(default)]
    pub pod_id: Option<String>,
    /// Store write deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Retention sweep settings.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Orphan detection settings.
    #[serde(default)]
    pub orphans: OrphanConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// A missing `pod_id` is filled from `$HOSTNAME` plus a random suffix so
    /// two workers on one host never share an identity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        if config.pod_id.is_none() {
            config.pod_id = Some(generate_pod_id());
        }
        Ok(config)
    }

    /// Identifier of this worker.
    #[must_use]
    pub fn pod_id(&self) -> &str {
        self.pod_id.as_deref().unwrap_or("pod")
    }

    /// Orphan heartbeat timeout.
    #[must_use]
    pub fn orphan_timeout(&self) -> Duration {
        Duration::from_secs(self.orphans.timeout_seconds)
    }

    /// Interval between orphan scans.
    #[must_use]
    pub fn orphan_check_interval(&self) -> Duration {
        Duration::from_secs(self.orphans.check_interval_seconds)
    }

    /// Event row time-to-live.
    #[must_use]
    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.retention.event_ttl_seconds)
    }

    /// Interval between retention sweeps.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.retention.cleanup_interval_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(AppError::Config("database_path must not be empty".into()));
        }
        if self
            .pod_id
            .as_deref()
            .is_some_and(|pod| pod.trim().is_empty())
        {
            return Err(AppError::Config("pod_id must not be blank".into()));
        }
        if self.timeouts.status_update_ms == 0 || self.timeouts.bulk_ms == 0 {
            return Err(AppError::Config(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.retention.session_retention_days == 0 {
            return Err(AppError::Config(
                "session_retention_days must be greater than zero".into(),
            ));
        }
        if self.retention.event_ttl_seconds == 0 || self.retention.cleanup_interval_seconds == 0 {
            return Err(AppError::Config(
                "event_ttl_seconds and cleanup_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.orphans.timeout_seconds == 0 || self.orphans.check_interval_seconds == 0 {
            return Err(AppError::Config(
                "orphan timeout_seconds and check_interval_seconds must be greater than zero"
                    .into(),
            ));
        }
        if self.retention.session_retention_days > MAX_RETENTION_DAYS {
            return Err(AppError::Config(format!(
                "session_retention_days must not exceed {MAX_RETENTION_DAYS}"
            )));
        }
        let periods = [
            ("retention.event_ttl_seconds", self.retention.event_ttl_seconds),
            (
                "retention.cleanup_interval_seconds",
                self.retention.cleanup_interval_seconds,
            ),
            ("orphans.timeout_seconds", self.orphans.timeout_seconds),
            (
                "orphans.check_interval_seconds",
                self.orphans.check_interval_seconds,
            ),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, secs)| *secs > MAX_PERIOD_SECONDS) {
            return Err(AppError::Config(format!(
                "{name} must not exceed {MAX_PERIOD_SECONDS}"
            )));
        }
        Ok(())
    }
}

fn generate_pod_id() -> String {
    let host = env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "pod".into());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}
