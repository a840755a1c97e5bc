//! Attempt ladder: the order in which modes are tried within one cycle.
//!
//! The configured mode gets two tries, then a date-range export, then a full
//! export. A rung only succeeds when the output directory ends up with at least
//! one non-empty file; a UI-level success with an empty directory is `NoData`.

use chrono::Utc;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use super::output::{inspect_directory, DirectoryStats};
use super::state::AttemptLog;
use crate::config::LadderConfig;
use crate::model::{AttemptOutcome, HarvestAttempt, HarvestMode, HarvestRequest};
use crate::traits::ModeRunner;

#[derive(Debug, Clone)]
pub struct AttemptLadder {
    modes: Vec<HarvestMode>,
    settle: Duration,
}

/// Aggregate result of one ladder run.
#[derive(Debug, Clone, Default)]
pub struct LadderReport {
    pub success: bool,
    /// Mode of the successful rung
    pub mode: Option<HarvestMode>,
    pub stats: DirectoryStats,
    /// Rungs tried, in order
    pub tried: Vec<(HarvestMode, AttemptOutcome)>,
    /// `mode: reason` for every rung that did not succeed
    pub failures: Vec<String>,
}

impl LadderReport {
    pub fn successful(&self) -> usize {
        self.tried
            .iter()
            .filter(|(_, outcome)| *outcome == AttemptOutcome::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.tried.len() - self.successful()
    }

    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            return "no modes attempted".to_string();
        }
        self.failures.join("; ")
    }
}

impl AttemptLadder {
    /// `[configured, configured, DateRange, All]`
    pub fn build(configured: HarvestMode, config: &LadderConfig) -> Self {
        Self {
            modes: vec![
                configured,
                configured,
                HarvestMode::DateRange,
                HarvestMode::All,
            ],
            settle: Duration::from_millis(config.settle_ms),
        }
    }

    pub fn modes(&self) -> &[HarvestMode] {
        &self.modes
    }

    /// Tries each rung until one produces data. Every rung is appended to `log`.
    #[instrument(skip_all, fields(cycle = cycle, dir = %output_dir.display()))]
    pub async fn run<R: ModeRunner + ?Sized>(
        &self,
        runner: &mut R,
        request: &HarvestRequest,
        output_dir: &Path,
        cycle: u32,
        log: &mut AttemptLog,
    ) -> LadderReport {
        let mut report = LadderReport::default();

        for (index, mode) in self.modes.iter().copied().enumerate() {
            let (attempt, stats) = self
                .try_mode(runner, mode, request, output_dir, cycle, index)
                .await;

            info!(
                attempt = attempt.attempt_index,
                total = self.modes.len(),
                %mode,
                outcome = ?attempt.outcome,
                reason = attempt.reason.as_deref().unwrap_or(""),
                duration_ms = attempt.duration_ms,
                "Ladder attempt finished"
            );

            report.tried.push((mode, attempt.outcome));
            let succeeded = attempt.outcome == AttemptOutcome::Success;
            if !succeeded {
                report.failures.push(format!(
                    "{}: {}",
                    mode,
                    attempt.reason.as_deref().unwrap_or("unknown")
                ));
            }
            log.record(attempt).await;

            if succeeded {
                report.success = true;
                report.mode = Some(mode);
                report.stats = stats;
                break;
            }
        }

        info!(
            successful = report.successful(),
            failed = report.failed(),
            success = report.success,
            "Ladder finished"
        );
        if !report.success {
            warn!(summary = %report.summary(), "Every ladder rung failed");
        }
        report
    }

    async fn try_mode<R: ModeRunner + ?Sized>(
        &self,
        runner: &mut R,
        mode: HarvestMode,
        request: &HarvestRequest,
        output_dir: &Path,
        cycle: u32,
        index: usize,
    ) -> (HarvestAttempt, DirectoryStats) {
        let started_at = Utc::now();
        let clock = Instant::now();

        let result = runner.run_mode(mode, request, output_dir).await;
        let (outcome, reason, stats) = if result.success {
            sleep(self.settle).await;
            match inspect_directory(output_dir).await {
                Ok(stats) if !stats.is_empty() => (AttemptOutcome::Success, None, stats),
                Ok(stats) => (
                    AttemptOutcome::NoData,
                    Some("no files in output directory".to_string()),
                    stats,
                ),
                Err(e) => (
                    AttemptOutcome::Failed,
                    Some(format!("cannot inspect output directory: {}", e)),
                    DirectoryStats::default(),
                ),
            }
        } else {
            (
                AttemptOutcome::Failed,
                Some(result.reason().unwrap_or_else(|| "automation failed".to_string())),
                DirectoryStats::default(),
            )
        };

        let attempt = HarvestAttempt {
            cycle,
            mode,
            attempt_index: index + 1,
            started_at,
            outcome,
            reason,
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        (attempt, stats)
    }
}
