use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Export mode offered by the acquisition application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestMode {
    /// Everything the device holds
    All,
    /// Only records added since the previous export
    SinceLast,
    /// Records inside an explicit date window
    DateRange,
}

impl fmt::Display for HarvestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HarvestMode::All => "all",
            HarvestMode::SinceLast => "since_last",
            HarvestMode::DateRange => "date_range",
        };
        f.write_str(label)
    }
}

/// One harvest run, built once from validated configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestRequest {
    /// Base directory under which each cycle creates its own output directory
    pub output_directory: PathBuf,

    pub mode: HarvestMode,

    pub from_date: Option<NaiveDate>,

    pub to_date: Option<NaiveDate>,
}

impl HarvestRequest {
    pub fn new(output_directory: impl Into<PathBuf>, mode: HarvestMode) -> Self {
        Self {
            output_directory: output_directory.into(),
            mode,
            from_date: None,
            to_date: None,
        }
    }

    pub fn with_dates(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from_date = Some(from);
        self.to_date = Some(to);
        self
    }

    /// Date window used when a date-range rung runs.
    ///
    /// Falls back to the last `default_days` days when the request carries no
    /// explicit bounds.
    pub fn date_window(&self, today: NaiveDate, default_days: u32) -> (NaiveDate, NaiveDate) {
        match (self.from_date, self.to_date) {
            (Some(from), Some(to)) => (from, to),
            (Some(from), None) => (from, today),
            (None, Some(to)) => (to - ChronoDuration::days(i64::from(default_days)), to),
            (None, None) => (today - ChronoDuration::days(i64::from(default_days)), today),
        }
    }

    /// Describes an inverted or empty date window. Validity is enforced upstream,
    /// so callers only log this.
    pub fn date_range_warning(&self) -> Option<String> {
        match (self.from_date, self.to_date) {
            (Some(from), Some(to)) if from >= to => Some(format!(
                "from_date {} is not before to_date {}",
                from, to
            )),
            _ => None,
        }
    }
}

/// Classification of a single ladder rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// UI reported success and the directory holds at least one non-empty file
    Success,
    /// UI reported success but the directory is empty
    NoData,
    /// The automation sequence failed
    Failed,
}

/// Record of one mode tried by the ladder. Appended to the attempt log and never
/// modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestAttempt {
    /// Outer cycle number (1-based)
    pub cycle: u32,

    pub mode: HarvestMode,

    /// Position in the ladder (1-based)
    pub attempt_index: usize,

    pub started_at: DateTime<Utc>,

    pub outcome: AttemptOutcome,

    pub reason: Option<String>,

    pub duration_ms: u64,
}

/// Where a progress reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    ProgressBar,
    TextScan,
    None,
}

/// A single poll of the progress indicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Milliseconds since monitoring started
    pub timestamp_ms: u64,

    pub percentage: Option<f64>,

    pub source: ProgressSource,
}

impl ProgressSample {
    pub fn empty(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            percentage: None,
            source: ProgressSource::None,
        }
    }
}

/// Overall result of a supervised cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Success,
    Failed,
}

/// Process exit codes interpreted by the calling supervisor.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_INVALID: i32 = 2;
    pub const CONNECTION_EXHAUSTED: i32 = 3;
    pub const AUTOMATION_FAILED: i32 = 4;
}

/// What [`HarvestSupervisor::run_cycle`](crate::harvest::HarvestSupervisor::run_cycle)
/// hands back to the caller.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub status: CycleStatus,

    /// Directory of the last cycle attempt, populated on success
    pub directory: Option<PathBuf>,

    /// Number of outer cycle attempts consumed
    pub cycles_used: u32,

    /// Non-empty files found in `directory`
    pub file_count: usize,

    pub total_bytes: u64,

    /// Failure reason of the last cycle attempt
    pub reason: Option<String>,

    /// Every ladder rung across all cycles, in order
    pub attempts: Vec<HarvestAttempt>,

    /// Whether the last cycle attempt aborted on connection exhaustion
    pub connection_exhausted: bool,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CycleStatus::Success
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            CycleStatus::Success => exit_codes::SUCCESS,
            CycleStatus::Failed if self.connection_exhausted => exit_codes::CONNECTION_EXHAUSTED,
            CycleStatus::Failed => exit_codes::AUTOMATION_FAILED,
        }
    }
}
