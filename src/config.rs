//! Runtime configuration for the harvest core.
//!
//! Every timing and threshold the automation relies on lives here so operators can
//! retune freeze detection and retry budgets without a rebuild. Sections default
//! individually, so a config file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarvestError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub app: AppConfig,
    pub connection: ConnectionConfig,
    pub automation: AutomationConfig,
    pub monitor: MonitorConfig,
    pub ladder: LadderConfig,
    pub cycle: CycleConfig,
    pub state: StateConfig,
}

/// How the acquisition application is started and swept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Case-insensitive substring matched against process names during sweeps
    pub process_name: String,
    /// Fixed local port of the remote control endpoint
    pub control_port: u16,
    /// Flag used to pass the control port; `None` when the binary opens it on its own
    pub control_port_flag: Option<String>,
    pub settle_ms: u64,
    /// Time between the graceful signal and the forced kill
    pub termination_grace_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("acquisition-app"),
            args: Vec::new(),
            process_name: "acquisition-app".to_string(),
            control_port: 9222,
            control_port_flag: Some("--remote-debugging-port".to_string()),
            settle_ms: 8_000,
            termination_grace_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            max_retries: 10,
            retry_delay_ms: 2_000,
            command_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Full-sequence retries per mode attempt
    pub sequence_retries: u32,
    pub sequence_retry_delay_ms: u64,
    /// Snapshot-and-locate attempts per element
    pub element_retries: u32,
    pub element_retry_delay_ms: u64,
    /// Pause after each UI action
    pub step_delay_ms: u64,
    /// Title text identifying the completion surface
    pub completion_title: String,
    /// `chrono` format used for the date fields
    pub date_format: String,
    /// Window used for date-range rungs when the request has no dates
    pub default_range_days: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            sequence_retries: 3,
            sequence_retry_delay_ms: 5_000,
            element_retries: 3,
            element_retry_delay_ms: 1_000,
            step_delay_ms: 750,
            completion_title: "Download Complete".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            default_range_days: 30,
        }
    }
}

/// Freeze-detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Hard ceiling for one monitoring run
    pub ceiling_secs: u64,
    /// Consecutive identical readings before the liveness check runs
    pub max_no_progress_checks: u32,
    pub max_grace_extensions: u32,
    /// Window during which a missing indicator is not counted
    pub initial_grace_ms: u64,
    /// Activity signals (out of 4) needed to grant a grace extension
    pub liveness_min_signals: usize,
    /// Polls at 100% without a completion surface before completion is assumed
    pub finish_grace_polls: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            ceiling_secs: 3_600,
            max_no_progress_checks: 6,
            max_grace_extensions: 2,
            initial_grace_ms: 60_000,
            liveness_min_signals: 2,
            finish_grace_polls: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    /// Delay between UI success and the directory inspection
    pub settle_ms: u64,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self { settle_ms: 3_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON file holding persisted run-state keys
    pub state_file: Option<PathBuf>,
    /// JSON-lines file receiving one record per ladder attempt
    pub attempt_log: Option<PathBuf>,
}

impl HarvestConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_json(&content)?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| HarvestError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.app.process_name.trim().is_empty() {
            errors.push("app.process_name must not be empty");
        }
        if self.app.control_port == 0 {
            errors.push("app.control_port must be non-zero");
        }
        if self.connection.max_retries == 0 {
            errors.push("connection.max_retries must be greater than 0");
        }
        if self.automation.sequence_retries == 0 {
            errors.push("automation.sequence_retries must be greater than 0");
        }
        if self.automation.element_retries == 0 {
            errors.push("automation.element_retries must be greater than 0");
        }
        if self.automation.completion_title.trim().is_empty() {
            errors.push("automation.completion_title must not be empty");
        }
        if self.monitor.poll_interval_ms == 0 {
            errors.push("monitor.poll_interval_ms must be greater than 0");
        }
        if self.monitor.ceiling_secs.saturating_mul(1_000) <= self.monitor.poll_interval_ms {
            errors.push("monitor.ceiling_secs must exceed one poll interval");
        }
        if self.monitor.max_no_progress_checks == 0 {
            errors.push("monitor.max_no_progress_checks must be greater than 0");
        }
        if !(1..=4).contains(&self.monitor.liveness_min_signals) {
            errors.push("monitor.liveness_min_signals must be between 1 and 4");
        }
        if self.cycle.max_attempts == 0 {
            errors.push("cycle.max_attempts must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::InvalidConfig(errors.join("; ")))
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}
