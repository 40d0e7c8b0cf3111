use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine settings. Every field has a default, so an empty
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Overrides `$GOPATH` when resolving Go-installed tools.
    #[serde(default)]
    pub go_path: Option<PathBuf>,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("recongraph.db"))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            go_path: None,
            scan: ScanSettings::default(),
            tools: ToolSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub stream_poll_interval_ms: u64,
    #[serde(default = "default_stderr_line_limit")]
    pub stderr_line_limit: usize,
    /// `0` disables the per-stage timeout.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_live_state_ttl_secs")]
    pub live_state_ttl_secs: u64,
    #[serde(default)]
    pub replay: ReplayPolicy,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_stderr_line_limit() -> usize {
    20
}

fn default_stage_timeout_secs() -> u64 {
    600
}

fn default_live_state_ttl_secs() -> u64 {
    3600
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            stream_poll_interval_ms: default_poll_interval_ms(),
            stderr_line_limit: default_stderr_line_limit(),
            stage_timeout_secs: default_stage_timeout_secs(),
            live_state_ttl_secs: default_live_state_ttl_secs(),
            replay: ReplayPolicy::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ScanSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }

    pub fn live_state_ttl(&self) -> Duration {
        Duration::from_secs(self.live_state_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// What a newly connected stream observer receives from the existing log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// The whole log so far.
    #[default]
    Full,
    /// Only the last N lines.
    Tail(usize),
}

impl ReplayPolicy {
    /// Initial read cursor for a log currently holding `len` lines.
    pub fn start_cursor(&self, len: usize) -> usize {
        match self {
            ReplayPolicy::Full => 0,
            ReplayPolicy::Tail(n) => len.saturating_sub(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_version_timeout_secs")]
    pub version_timeout_secs: u64,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
}

fn default_version_timeout_secs() -> u64 {
    10
}

fn default_install_timeout_secs() -> u64 {
    300
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            version_timeout_secs: default_version_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
