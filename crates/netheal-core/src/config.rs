//! Run configuration
//!
//! Loaded from `netheal.toml`; every field has a default so an empty file
//! (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use netheal_exec::ExecTimeouts;
use netheal_oracle::OracleConfig;

use crate::error::NetHealError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetHealConfig {
    /// Root for `input/` and `reports/`
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/input/devices.json`
    pub registry_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/input/l3_topology.json`
    pub topology_path: Option<PathBuf>,
    /// Extra JSON alarm sources merged at intake
    pub alarm_files: Vec<PathBuf>,
    /// HYPOTHESIZE/REMEDIATE cycles before forced escalation
    pub attempt_bound: u32,
    pub human_in_the_loop: bool,
    /// Wait after an unsuccessful remediation before the next round
    pub settle_delay_secs: u64,
    /// Upper bound for every fan-out pool
    pub fleet_cap: usize,
    pub timeouts: TimeoutConfig,
    /// Static traffic path; derived by the oracle when absent
    pub traffic_path: Option<Vec<String>>,
    pub telemetry: TelemetryConfig,
    pub oracle: OracleConfig,
    pub refresh_recon_on_retry: bool,
    /// Defaults to `<data_dir>/reports/session_log.jsonl`
    pub session_log: Option<PathBuf>,
}

impl Default for NetHealConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            registry_path: None,
            topology_path: None,
            alarm_files: Vec::new(),
            attempt_bound: 5,
            human_in_the_loop: true,
            settle_delay_secs: 60,
            fleet_cap: 16,
            timeouts: TimeoutConfig::default(),
            traffic_path: None,
            telemetry: TelemetryConfig::default(),
            oracle: OracleConfig::default(),
            refresh_recon_on_retry: true,
            session_log: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub command_secs: u64,
    pub oracle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            command_secs: 60,
            oracle_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub probes: Vec<ProbeConfig>,
}

/// Ping probes run from one linux host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub probe_host: String,
    pub targets: Vec<String>,
    #[serde(default = "default_ping_count")]
    pub count: u32,
}

fn default_ping_count() -> u32 {
    4
}

impl ProbeConfig {
    pub fn new(probe_host: impl Into<String>, targets: &[&str]) -> Self {
        Self {
            probe_host: probe_host.into(),
            targets: targets.iter().map(|t| (*t).to_string()).collect(),
            count: default_ping_count(),
        }
    }
}

impl NetHealConfig {
    /// Parse a TOML file
    ///
    /// # Errors
    /// `NetHealError::Config` if the file is unreadable, malformed or fails validation.
    pub fn load(path: &Path) -> Result<Self, NetHealError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NetHealError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// # Errors
    /// `NetHealError::Config` on parse or validation failure.
    pub fn from_toml(text: &str) -> Result<Self, NetHealError> {
        let config: Self = toml::from_str(text).map_err(|e| NetHealError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `NetHealError::Config` naming the first bad field.
    pub fn validate(&self) -> Result<(), NetHealError> {
        if self.attempt_bound == 0 {
            return Err(NetHealError::Config("attempt_bound must be at least 1".into()));
        }
        if self.fleet_cap == 0 {
            return Err(NetHealError::Config("fleet_cap must be at least 1".into()));
        }
        if let Some(path) = &self.traffic_path {
            if path.iter().all(|d| d.trim().is_empty()) {
                return Err(NetHealError::Config("traffic_path is empty".into()));
            }
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_attempt_bound(mut self, bound: u32) -> Self {
        self.attempt_bound = bound;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_human_in_the_loop(mut self, enabled: bool) -> Self {
        self.human_in_the_loop = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_secs = delay.as_secs();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_fleet_cap(mut self, cap: usize) -> Self {
        self.fleet_cap = cap;
        self
    }

    #[must_use]
    pub fn with_traffic_path(mut self, devices: &[&str]) -> Self {
        self.traffic_path = Some(devices.iter().map(|d| (*d).to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.telemetry.probes.push(probe);
        self
    }

    #[must_use]
    pub fn with_alarm_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.alarm_files.push(path.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_refresh_recon_on_retry(mut self, refresh: bool) -> Self {
        self.refresh_recon_on_retry = refresh;
        self
    }

    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("input").join("devices.json"))
    }

    #[must_use]
    pub fn topology_path(&self) -> PathBuf {
        self.topology_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("input").join("l3_topology.json"))
    }

    #[must_use]
    pub fn session_log_path(&self) -> PathBuf {
        self.session_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join("reports").join("session_log.jsonl"))
    }

    #[must_use]
    pub fn debug_log_path(&self) -> PathBuf {
        self.data_dir.join("input").join("agentic_debug.log")
    }

    #[must_use]
    pub fn exec_timeouts(&self) -> ExecTimeouts {
        ExecTimeouts::default()
            .with_connect(Duration::from_secs(self.timeouts.connect_secs))
            .with_per_command(Duration::from_secs(self.timeouts.command_secs))
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Oracle settings with the configured call timeout applied
    #[must_use]
    pub fn oracle_config(&self) -> OracleConfig {
        let mut oracle = self.oracle.clone();
        oracle.timeout_secs = self.timeouts.oracle_secs;
        oracle
    }
}
