//! Outer cycle loop: one fresh process, one connection and one ladder run per
//! cycle attempt, with verified teardown in between.

use chrono::{Local, Utc};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use super::automation::HarvestAutomation;
use super::ladder::AttemptLadder;
use super::output::{inspect_directory, prepare_output_directory, DirectoryStats};
use super::state::{AttemptLog, CycleRecord, RunStateStore};
use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::model::{CycleOutcome, CycleStatus, HarvestRequest};
use crate::traits::{AppLauncher, Connector};

/// Why a cycle attempt ended without data.
#[derive(Debug)]
struct AttemptFailure {
    reason: String,
    connection_exhausted: bool,
}

impl From<HarvestError> for AttemptFailure {
    fn from(e: HarvestError) -> Self {
        Self {
            connection_exhausted: matches!(e, HarvestError::ConnectionExhausted { .. }),
            reason: e.to_string(),
        }
    }
}

pub struct HarvestSupervisor<L: AppLauncher, C: Connector> {
    config: HarvestConfig,
    launcher: L,
    connector: C,
    log: AttemptLog,
    state: RunStateStore,
}

impl<L: AppLauncher, C: Connector> HarvestSupervisor<L, C> {
    /// Supervisor with an in-memory attempt log and run state.
    pub fn new(config: HarvestConfig, launcher: L, connector: C) -> Self {
        Self {
            config,
            launcher,
            connector,
            log: AttemptLog::new(),
            state: RunStateStore::ephemeral(),
        }
    }

    /// Supervisor backed by the state and attempt-log files named in the config.
    pub async fn open(config: HarvestConfig, launcher: L, connector: C) -> Result<Self> {
        let state = match &config.state.state_file {
            Some(path) => RunStateStore::open(path).await?,
            None => RunStateStore::ephemeral(),
        };
        let log = match &config.state.attempt_log {
            Some(path) => AttemptLog::with_sink(path),
            None => AttemptLog::new(),
        };
        Ok(Self {
            config,
            launcher,
            connector,
            log,
            state,
        })
    }

    pub fn attempt_log(&self) -> &AttemptLog {
        &self.log
    }

    pub fn run_state(&self) -> &RunStateStore {
        &self.state
    }

    /// Runs up to `cycle.max_attempts` cycle attempts and reports the first
    /// verified success, or the last failure.
    #[instrument(skip_all, fields(mode = %request.mode))]
    pub async fn run_cycle(&mut self, request: &HarvestRequest) -> CycleOutcome {
        let max_attempts = self.config.cycle.max_attempts.max(1);
        let first_entry = self.log.len();
        let mut outcome = CycleOutcome {
            status: CycleStatus::Failed,
            directory: None,
            cycles_used: 0,
            file_count: 0,
            total_bytes: 0,
            reason: None,
            attempts: Vec::new(),
            connection_exhausted: false,
        };

        for cycle in 1..=max_attempts {
            outcome.cycles_used = cycle;

            let dir = match prepare_output_directory(&request.output_directory, Local::now()).await
            {
                Ok(dir) => dir,
                Err(e) => {
                    error!(error = %e, base = %request.output_directory.display(), "Cannot create output directory");
                    outcome.reason = Some(format!("cannot create output directory: {}", e));
                    break;
                }
            };
            info!(cycle, max_attempts, dir = %dir.display(), "Starting cycle attempt");

            match self.run_attempt(request, cycle, &dir).await {
                Ok(stats) => {
                    info!(
                        cycle,
                        files = stats.file_count,
                        bytes = stats.total_bytes,
                        "Harvest verified"
                    );
                    self.persist(&dir, true, cycle, stats).await;
                    outcome.status = CycleStatus::Success;
                    outcome.file_count = stats.file_count;
                    outcome.total_bytes = stats.total_bytes;
                    outcome.reason = None;
                    outcome.connection_exhausted = false;
                    outcome.directory = Some(dir);
                    break;
                }
                Err(failure) => {
                    warn!(cycle, max_attempts, reason = %failure.reason, "Cycle attempt failed");
                    self.persist(&dir, false, cycle, DirectoryStats::default())
                        .await;
                    outcome.reason = Some(failure.reason);
                    outcome.connection_exhausted = failure.connection_exhausted;
                    outcome.directory = Some(dir);
                }
            }

            if cycle < max_attempts {
                sleep(Duration::from_millis(self.config.cycle.backoff_ms)).await;
            }
        }

        if !outcome.is_success() {
            error!(
                cycles = outcome.cycles_used,
                reason = outcome.reason.as_deref().unwrap_or(""),
                "Harvest failed"
            );
        }
        outcome.attempts = self.log.since(first_entry).to_vec();
        outcome
    }

    async fn run_attempt(
        &mut self,
        request: &HarvestRequest,
        cycle: u32,
        dir: &Path,
    ) -> std::result::Result<DirectoryStats, AttemptFailure> {
        let handle = self.launcher.launch().await?;
        let driven = self.drive(request, cycle, dir).await;
        self.launcher.terminate(handle).await;
        driven?;

        let stats = inspect_directory(dir).await.map_err(HarvestError::from)?;
        if stats.is_empty() {
            return Err(HarvestError::VerificationEmpty(dir.to_path_buf()).into());
        }
        Ok(stats)
    }

    /// Connects, runs the ladder and disconnects. The process stays up.
    async fn drive(
        &mut self,
        request: &HarvestRequest,
        cycle: u32,
        dir: &Path,
    ) -> std::result::Result<(), AttemptFailure> {
        let surface = self
            .connector
            .connect(self.config.connection.max_retries)
            .await?;

        let mut automation = HarvestAutomation::new(
            surface,
            self.config.automation.clone(),
            self.config.monitor.clone(),
        );
        let ladder = AttemptLadder::build(request.mode, &self.config.ladder);
        let report = ladder
            .run(&mut automation, request, dir, cycle, &mut self.log)
            .await;
        self.connector.disconnect(automation.into_surface()).await;

        if report.success {
            Ok(())
        } else {
            Err(AttemptFailure {
                reason: format!("all modes failed: {}", report.summary()),
                connection_exhausted: false,
            })
        }
    }

    async fn persist(&mut self, dir: &Path, completed: bool, cycle: u32, stats: DirectoryStats) {
        self.state.record_cycle(&CycleRecord {
            directory: dir,
            finished_at: Utc::now(),
            completed,
            attempts: cycle,
            file_count: stats.file_count,
            total_bytes: stats.total_bytes,
        });
        if let Err(e) = self.state.persist().await {
            warn!(error = %e, "Failed to persist run state");
        }
    }
}
