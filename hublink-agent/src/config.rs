//! Configuration for the hub link agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hublink_core::protocol::HUB_PORT;
use hublink_core::{ConnectionInfo, HubError, HubSerial, SupervisorTiming};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Which hub to talk to.
    pub hub: HubConfig,
    /// Supervisor timing.
    pub timing: TimingConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Hub endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Hostname or IP address of the hub.
    pub host: String,
    /// TCP port (the hub always uses 27779).
    pub port: u16,
    /// The hub's 12-digit serial number.
    pub serial: String,
}

/// Supervisor timing, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound for a single read; keepalives go out about this often.
    pub io_timeout_secs: u64,
    /// Force a full state refresh at least this often.
    pub full_scan_interval_secs: u64,
    /// Wait this long before each reconnect attempt.
    pub retry_backoff_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: HUB_PORT,
            serial: String::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        let timing = SupervisorTiming::default();
        Self {
            io_timeout_secs: timing.io_timeout.as_secs(),
            full_scan_interval_secs: timing.full_scan_interval.as_secs(),
            retry_backoff_secs: timing.retry_backoff.as_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The hub endpoint, validated.
    pub fn to_connection_info(&self) -> Result<ConnectionInfo, HubError> {
        let host = self.hub.host.trim();
        if host.is_empty() {
            return Err(HubError::InvalidConfig("hub host is not set".into()));
        }
        let serial = HubSerial::parse(&self.hub.serial)?;
        Ok(ConnectionInfo::with_port(host, self.hub.port, serial))
    }

    /// Convert timing settings into a `SupervisorTiming`. Zero values are
    /// raised to one second.
    pub fn to_timing(&self) -> SupervisorTiming {
        let secs = |s: u64| Duration::from_secs(s.max(1));
        SupervisorTiming {
            io_timeout: secs(self.timing.io_timeout_secs),
            full_scan_interval: secs(self.timing.full_scan_interval_secs),
            retry_backoff: secs(self.timing.retry_backoff_secs),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
