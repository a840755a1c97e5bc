//! Harvest core: locating controls, driving one mode, watching progress, the
//! attempt ladder and the supervised cycle.
//!
//! - [`locator`] finds controls by class with ordered fallback strategies
//! - [`automation`] runs the select → configure → start → monitor sequence
//! - [`monitor`] samples progress and decides when a harvest is frozen
//! - [`ladder`] tries the configured mode, then broader ones
//! - [`supervisor`] owns process lifetime across cycle attempts
//! - [`output`] and [`state`] cover what ends up on disk

pub mod automation;
pub mod ladder;
pub mod locator;
pub mod monitor;
pub mod output;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod fake;

pub use automation::{AutomationResult, AutomationState, HarvestAutomation};
pub use ladder::{AttemptLadder, LadderReport};
pub use locator::{locate, locate_completion_surface, locate_within, ElementClass};
pub use monitor::{
    assess_liveness, sample_progress, CompletionSignal, LivenessReport, MonitorReport,
    ProgressMonitor, ProgressState, ProgressTracker, Verdict,
};
pub use output::{inspect_directory, prepare_output_directory, DirectoryStats};
pub use state::{AttemptLog, CycleRecord, RunStateStore};
pub use supervisor::HarvestSupervisor;
