//! Progress monitoring and freeze detection.
//!
//! [`ProgressTracker`] is the pure classification core: it consumes
//! [`ProgressSample`]s and decides when a stall needs a liveness check and whether
//! that check grants a grace extension. [`ProgressMonitor`] drives it from a poll
//! loop that races a hard deadline.

use regex::Regex;
use std::sync::OnceLock;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::locator::{self, contains_phrase, ElementClass};
use crate::config::MonitorConfig;
use crate::control::{ElementSnapshot, UiSnapshot};
use crate::error::HarvestError;
use crate::model::{ProgressSample, ProgressSource};
use crate::traits::ControlSurface;

/// Fragments that tie a percentage to the harvest rather than to some other widget.
const HARVEST_CONTEXT: [&str; 8] = [
    "download", "export", "harvest", "progress", "extract", "transfer", "record", "sync",
];

/// Widgets whose percentages are never harvest progress.
const IRRELEVANT: [&str; 6] = ["battery", "cpu", "memory", "disk", "storage", "ram"];

/// Text or class fragments showing a job is running.
const ACTIVE_MARKERS: [&str; 10] = [
    "running", "in progress", "in-progress", "downloading", "exporting", "harvesting",
    "processing", "busy", "spinner", "loading",
];

/// Consecutive snapshot failures tolerated before the session is considered lost.
const MAX_SNAPSHOT_FAILURES: u32 = 3;

const EPSILON: f64 = 0.001;

fn percentage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^\d.,])(\d{1,3}(?:[.,]\d+)?)\s*%").expect("valid regex")
    })
}

fn context_of(snapshot: &UiSnapshot, element: &ElementSnapshot) -> String {
    let mut context = element.haystack();
    if let Some(id) = &element.id {
        context.push(' ');
        context.push_str(&id.to_lowercase());
    }
    if let Some(title) = element
        .container
        .as_ref()
        .and_then(|c| snapshot.get(c))
        .and_then(|c| c.dialog_title.as_deref())
    {
        context.push(' ');
        context.push_str(&title.to_lowercase());
    }
    context
}

fn is_irrelevant(context: &str) -> bool {
    IRRELEVANT.iter().any(|word| contains_phrase(context, word))
}

/// Reads the harvest percentage from a snapshot: progress markup first, then a
/// keyword-filtered text scan.
pub fn sample_progress(snapshot: &UiSnapshot, timestamp_ms: u64) -> ProgressSample {
    let bar = snapshot
        .visible()
        .filter(|e| e.progress.is_some_and(f64::is_finite))
        .find(|e| !is_irrelevant(&context_of(snapshot, e)));
    if let Some(percentage) = bar.and_then(|e| e.progress) {
        return ProgressSample {
            timestamp_ms,
            percentage: Some(percentage.clamp(0.0, 100.0)),
            source: ProgressSource::ProgressBar,
        };
    }

    for element in snapshot.visible() {
        let Some(captures) = percentage_pattern().captures(&element.text) else {
            continue;
        };
        let context = context_of(snapshot, element);
        if is_irrelevant(&context) || !HARVEST_CONTEXT.iter().any(|k| context.contains(k)) {
            continue;
        }
        let parsed = captures[1].replace(',', ".").parse::<f64>();
        if let Ok(value) = parsed {
            if (0.0..=100.0).contains(&value) {
                return ProgressSample {
                    timestamp_ms,
                    percentage: Some(value),
                    source: ProgressSource::TextScan,
                };
            }
        }
    }

    ProgressSample::empty(timestamp_ms)
}

/// Independent activity signals consulted when progress stops moving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub cancel_present: bool,
    pub progress_markup: bool,
    pub active_indicator: bool,
    pub start_disabled: bool,
}

impl LivenessReport {
    pub fn active_signals(&self) -> usize {
        [
            self.cancel_present,
            self.progress_markup,
            self.active_indicator,
            self.start_disabled,
        ]
        .iter()
        .filter(|signal| **signal)
        .count()
    }
}

fn start_reads_as_cancel(element: &ElementSnapshot) -> bool {
    let text = element.text.to_lowercase();
    contains_phrase(&text, "cancel") || contains_phrase(&text, "stop")
}

pub fn assess_liveness(snapshot: &UiSnapshot) -> LivenessReport {
    let start = locator::locate(snapshot, ElementClass::Start).ok();

    LivenessReport {
        cancel_present: [ElementClass::Cancel, ElementClass::Stop]
            .into_iter()
            .any(|class| locator::locate(snapshot, class).is_ok_and(|e| !e.disabled))
            || start.is_some_and(|e| !e.disabled && start_reads_as_cancel(e)),
        progress_markup: snapshot.visible().any(|e| {
            e.progress.is_some_and(|p| p > 0.0) && !is_irrelevant(&context_of(snapshot, e))
        }),
        active_indicator: snapshot.visible().any(|e| {
            let hay = e.haystack();
            ACTIVE_MARKERS.iter().any(|m| contains_phrase(&hay, m))
        }),
        start_disabled: start.is_some_and(|e| e.disabled),
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Classification of a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Advancing,
    Stalled,
    Finished,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue(ProgressState),
    /// The stall threshold was reached; call [`ProgressTracker::resolve_liveness`]
    CheckLiveness,
    /// Progress sat at 100% long enough to count as done
    Finished,
}

#[derive(Debug)]
pub struct ProgressTracker {
    max_no_progress_checks: u32,
    max_grace_extensions: u32,
    liveness_min_signals: usize,
    initial_grace_ms: u64,
    finish_grace_polls: u32,

    last_percentage: Option<f64>,
    /// The latest reading had no percentage
    indicator_lost: bool,
    /// Consecutive identical readings, or consecutive blank polls after the
    /// initial grace. A switch between the two restarts the count.
    stall_count: u32,
    grace_used: u32,
    finished_polls: u32,
}

impl ProgressTracker {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            max_no_progress_checks: config.max_no_progress_checks,
            max_grace_extensions: config.max_grace_extensions,
            liveness_min_signals: config.liveness_min_signals,
            initial_grace_ms: config.initial_grace_ms,
            finish_grace_polls: config.finish_grace_polls,
            last_percentage: None,
            indicator_lost: false,
            stall_count: 0,
            grace_used: 0,
            finished_polls: 0,
        }
    }

    pub fn last_percentage(&self) -> Option<f64> {
        self.last_percentage
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    pub fn grace_used(&self) -> u32 {
        self.grace_used
    }

    pub fn observe(&mut self, sample: &ProgressSample) -> Verdict {
        let blank = sample.percentage.is_none();
        if blank != self.indicator_lost {
            self.indicator_lost = blank;
            self.stall_count = 0;
        }

        let state = match sample.percentage {
            Some(value) if value >= 100.0 - EPSILON => {
                self.last_percentage = Some(100.0);
                self.stall_count = 0;
                self.finished_polls += 1;
                if self.finished_polls >= self.finish_grace_polls {
                    return Verdict::Finished;
                }
                ProgressState::Finished
            }
            Some(value) => {
                self.finished_polls = 0;
                match self.last_percentage {
                    Some(last) if (last - value).abs() < EPSILON => {
                        self.stall_count += 1;
                        ProgressState::Stalled
                    }
                    _ => {
                        self.last_percentage = Some(value);
                        self.stall_count = 0;
                        ProgressState::Advancing
                    }
                }
            }
            None => {
                if sample.timestamp_ms >= self.initial_grace_ms {
                    self.stall_count += 1;
                }
                ProgressState::Inactive
            }
        };

        if self.stall_count >= self.max_no_progress_checks {
            Verdict::CheckLiveness
        } else {
            Verdict::Continue(state)
        }
    }

    /// Grants a grace extension when enough activity signals are present and
    /// extensions remain; otherwise declares the freeze.
    pub fn resolve_liveness(&mut self, report: &LivenessReport) -> Result<(), HarvestError> {
        let active = report.active_signals();
        if active >= self.liveness_min_signals && self.grace_used < self.max_grace_extensions {
            self.grace_used += 1;
            self.stall_count = 0;
            info!(
                active_signals = active,
                grace_used = self.grace_used,
                "Job still active despite stalled progress, extending grace"
            );
            return Ok(());
        }

        warn!(
            active_signals = active,
            grace_used = self.grace_used,
            stalled_at = %self.frozen_label(),
            "Progress freeze confirmed"
        );
        Err(HarvestError::ProgressFrozen(self.frozen_label()))
    }

    fn frozen_label(&self) -> String {
        if self.indicator_lost {
            return "no progress indicator".to_string();
        }
        match self.last_percentage {
            Some(value) if value.fract().abs() < EPSILON => format!("{:.0}%", value),
            Some(value) => format!("{:.1}%", value),
            None => "no progress indicator".to_string(),
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    /// The title-matched completion surface appeared
    Surface,
    /// Progress held at 100% without a completion surface
    ProgressFinished,
}

#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub polls: u32,
    pub grace_used: u32,
    pub last_percentage: Option<f64>,
    pub completion: CompletionSignal,
}

pub struct ProgressMonitor<'a, S: ControlSurface + ?Sized> {
    surface: &'a S,
    config: &'a MonitorConfig,
    completion_title: &'a str,
}

impl<'a, S: ControlSurface + ?Sized> ProgressMonitor<'a, S> {
    pub fn new(surface: &'a S, config: &'a MonitorConfig, completion_title: &'a str) -> Self {
        Self {
            surface,
            config,
            completion_title,
        }
    }

    /// Polls until completion, freeze or the hard ceiling, whichever comes first.
    ///
    /// # Errors
    ///
    /// - [`HarvestError::ProgressFrozen`] when a stall is confirmed
    /// - [`HarvestError::MonitoringTimeout`] when the ceiling elapses
    /// - [`HarvestError::Control`] when the surface stops answering
    #[instrument(skip(self), fields(ceiling_secs = self.config.ceiling_secs))]
    pub async fn watch(&self) -> Result<MonitorReport, HarvestError> {
        let deadline = sleep(self.config.ceiling());
        tokio::pin!(deadline);

        tokio::select! {
            result = self.poll_loop() => result,
            _ = &mut deadline => {
                warn!(ceiling_secs = self.config.ceiling_secs, "monitoring timeout");
                Err(HarvestError::MonitoringTimeout(self.config.ceiling_secs))
            }
        }
    }

    async fn poll_loop(&self) -> Result<MonitorReport, HarvestError> {
        let started = Instant::now();
        let mut tracker = ProgressTracker::new(self.config);
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0u32;
        let mut snapshot_failures = 0u32;

        loop {
            ticker.tick().await;
            polls += 1;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let snapshot = match self.surface.snapshot().await {
                Ok(snapshot) => {
                    snapshot_failures = 0;
                    snapshot
                }
                Err(e) => {
                    snapshot_failures += 1;
                    warn!(poll = polls, failures = snapshot_failures, error = %e, "Snapshot failed");
                    if snapshot_failures >= MAX_SNAPSHOT_FAILURES {
                        return Err(e.into());
                    }
                    continue;
                }
            };

            if locator::locate_completion_surface(&snapshot, self.completion_title).is_some() {
                info!(poll = polls, elapsed_ms, "Completion surface detected");
                return Ok(MonitorReport {
                    polls,
                    grace_used: tracker.grace_used(),
                    last_percentage: tracker.last_percentage(),
                    completion: CompletionSignal::Surface,
                });
            }

            let sample = sample_progress(&snapshot, elapsed_ms);
            match tracker.observe(&sample) {
                Verdict::Continue(state) => {
                    debug!(
                        poll = polls,
                        percentage = ?sample.percentage,
                        source = ?sample.source,
                        ?state,
                        stalls = tracker.stall_count(),
                        "Progress sampled"
                    );
                }
                Verdict::CheckLiveness => {
                    let report = assess_liveness(&snapshot);
                    debug!(poll = polls, ?report, "Liveness check");
                    tracker.resolve_liveness(&report)?;
                }
                Verdict::Finished => {
                    info!(poll = polls, "Progress held at 100% without completion surface");
                    return Ok(MonitorReport {
                        polls,
                        grace_used: tracker.grace_used(),
                        last_percentage: tracker.last_percentage(),
                        completion: CompletionSignal::ProgressFinished,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ElementRef;
    use crate::harvest::fake::{FakeApp, Tick};

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 1_000,
            ceiling_secs: 600,
            max_no_progress_checks: 6,
            max_grace_extensions: 2,
            initial_grace_ms: 5_000,
            liveness_min_signals: 2,
            finish_grace_polls: 3,
        }
    }

    fn at(timestamp_ms: u64, value: f64) -> ProgressSample {
        ProgressSample {
            timestamp_ms,
            percentage: Some(value),
            source: ProgressSource::TextScan,
        }
    }

    fn text(handle: &str, value: &str) -> ElementSnapshot {
        ElementSnapshot {
            handle: ElementRef::new(handle),
            tag: "span".into(),
            text: value.into(),
            visible: true,
            ..Default::default()
        }
    }

    const ACTIVE: LivenessReport = LivenessReport {
        cancel_present: true,
        progress_markup: false,
        active_indicator: false,
        start_disabled: true,
    };

    #[test]
    fn test_progress_bar_preferred_over_text() {
        let snapshot = UiSnapshot::new(vec![
            text("1", "Downloading records 10%"),
            ElementSnapshot {
                tag: "progress".into(),
                progress: Some(55.0),
                ..text("2", "")
            },
        ]);
        let sample = sample_progress(&snapshot, 0);
        assert_eq!(sample.percentage, Some(55.0));
        assert_eq!(sample.source, ProgressSource::ProgressBar);
    }

    #[test]
    fn test_text_scan_requires_harvest_context() {
        let snapshot = UiSnapshot::new(vec![
            text("1", "Battery 80%"),
            text("2", "Zoom 125%"),
            text("3", "CPU load 12% while downloading"),
            text("4", "Export progress: 37,5 %"),
        ]);
        let sample = sample_progress(&snapshot, 0);
        assert_eq!(sample.percentage, Some(37.5));
        assert_eq!(sample.source, ProgressSource::TextScan);
    }

    #[test]
    fn test_text_scan_ignores_tail_of_longer_number() {
        let snapshot = UiSnapshot::new(vec![text("1", "Export progress 1234%")]);
        assert_eq!(sample_progress(&snapshot, 0).percentage, None);

        let snapshot = UiSnapshot::new(vec![text("1", "74% exported")]);
        assert_eq!(sample_progress(&snapshot, 0).percentage, Some(74.0));
    }

    #[test]
    fn test_irrelevant_progress_bar_skipped() {
        let snapshot = UiSnapshot::new(vec![ElementSnapshot {
            label: Some("Disk usage".into()),
            progress: Some(71.0),
            ..text("1", "")
        }]);
        assert_eq!(sample_progress(&snapshot, 0).percentage, None);
    }

    #[test]
    fn test_no_freeze_before_threshold() {
        let mut tracker = ProgressTracker::new(&config());
        assert_eq!(
            tracker.observe(&at(0, 42.0)),
            Verdict::Continue(ProgressState::Advancing)
        );
        for poll in 1..6 {
            assert_eq!(
                tracker.observe(&at(poll * 1_000, 42.0)),
                Verdict::Continue(ProgressState::Stalled),
                "poll {poll}"
            );
        }
        assert_eq!(tracker.observe(&at(6_000, 42.0)), Verdict::CheckLiveness);
        assert_eq!(tracker.stall_count(), 6);
    }

    #[test]
    fn test_advancing_reading_resets_stall() {
        let mut tracker = ProgressTracker::new(&config());
        for poll in 0..5 {
            tracker.observe(&at(poll * 1_000, 10.0));
        }
        assert_eq!(tracker.stall_count(), 4);
        assert_eq!(
            tracker.observe(&at(5_000, 11.0)),
            Verdict::Continue(ProgressState::Advancing)
        );
        assert_eq!(tracker.stall_count(), 0);
    }

    #[test]
    fn test_grace_extensions_are_capped() {
        let mut tracker = ProgressTracker::new(&config());
        tracker.observe(&at(0, 42.0));

        for round in 0..3 {
            let mut verdict = Verdict::Continue(ProgressState::Stalled);
            for _ in 0..6 {
                verdict = tracker.observe(&at(1_000, 42.0));
            }
            assert_eq!(verdict, Verdict::CheckLiveness, "round {round}");

            let result = tracker.resolve_liveness(&ACTIVE);
            if round < 2 {
                assert!(result.is_ok());
                assert_eq!(tracker.stall_count(), 0);
            } else {
                // Third stall: extensions exhausted, activity no longer helps.
                match result {
                    Err(HarvestError::ProgressFrozen(label)) => assert_eq!(label, "42%"),
                    other => panic!("expected freeze, got {other:?}"),
                }
            }
        }
        assert_eq!(tracker.grace_used(), 2);
    }

    #[test]
    fn test_missing_indicator_tolerated_during_initial_grace() {
        let mut tracker = ProgressTracker::new(&config());
        for poll in 0..5 {
            tracker.observe(&ProgressSample::empty(poll * 1_000));
        }
        assert_eq!(tracker.stall_count(), 0);

        let mut verdict = Verdict::Continue(ProgressState::Inactive);
        for poll in 5..11 {
            verdict = tracker.observe(&ProgressSample::empty(poll * 1_000));
        }
        assert_eq!(verdict, Verdict::CheckLiveness);

        let err = tracker
            .resolve_liveness(&LivenessReport::default())
            .unwrap_err();
        assert!(err.to_string().contains("no progress indicator"));
    }

    #[test]
    fn test_blank_polls_do_not_extend_identical_streak() {
        let mut config = config();
        config.initial_grace_ms = 0;
        let mut tracker = ProgressTracker::new(&config);

        tracker.observe(&at(0, 42.0));
        for poll in 1..4 {
            tracker.observe(&at(poll * 1_000, 42.0));
        }
        assert_eq!(tracker.stall_count(), 3);

        for poll in 4..7 {
            assert_eq!(
                tracker.observe(&ProgressSample::empty(poll * 1_000)),
                Verdict::Continue(ProgressState::Inactive)
            );
        }
        assert_eq!(tracker.stall_count(), 3);

        // The indicator returns at the same value: the identical streak starts over.
        for poll in 7..12 {
            assert_eq!(
                tracker.observe(&at(poll * 1_000, 42.0)),
                Verdict::Continue(ProgressState::Stalled),
                "poll {poll}"
            );
        }
        assert_eq!(tracker.observe(&at(12_000, 42.0)), Verdict::CheckLiveness);
        match tracker.resolve_liveness(&LivenessReport::default()) {
            Err(HarvestError::ProgressFrozen(label)) => assert_eq!(label, "42%"),
            other => panic!("expected freeze, got {other:?}"),
        }
    }

    #[test]
    fn test_lost_indicator_freezes_after_full_blank_streak() {
        let mut config = config();
        config.initial_grace_ms = 0;
        let mut tracker = ProgressTracker::new(&config);

        tracker.observe(&at(0, 42.0));
        tracker.observe(&at(1_000, 42.0));
        let mut verdict = Verdict::Continue(ProgressState::Inactive);
        for poll in 2..8 {
            verdict = tracker.observe(&ProgressSample::empty(poll * 1_000));
        }
        assert_eq!(verdict, Verdict::CheckLiveness);
        let err = tracker
            .resolve_liveness(&LivenessReport::default())
            .unwrap_err();
        assert!(err.to_string().contains("no progress indicator"));
    }

    #[test]
    fn test_hundred_percent_finishes_after_grace_polls() {
        let mut tracker = ProgressTracker::new(&config());
        assert_eq!(
            tracker.observe(&at(0, 100.0)),
            Verdict::Continue(ProgressState::Finished)
        );
        tracker.observe(&at(1_000, 100.0));
        assert_eq!(tracker.observe(&at(2_000, 100.0)), Verdict::Finished);
    }

    #[test]
    fn test_liveness_signals() {
        let snapshot = UiSnapshot::new(vec![
            ElementSnapshot {
                id: Some("start".into()),
                tag: "button".into(),
                disabled: true,
                ..text("1", "Start")
            },
            ElementSnapshot {
                tag: "button".into(),
                ..text("2", "Cancel")
            },
            ElementSnapshot {
                classes: vec!["status".into(), "is-running".into()],
                ..text("3", "")
            },
        ]);
        let report = assess_liveness(&snapshot);
        assert!(report.cancel_present);
        assert!(report.start_disabled);
        assert!(report.active_indicator);
        assert!(!report.progress_markup);
        assert_eq!(report.active_signals(), 3);
    }

    #[test]
    fn test_start_toggle_counts_as_cancel_control() {
        let snapshot = UiSnapshot::new(vec![ElementSnapshot {
            id: Some("start-button".into()),
            tag: "button".into(),
            ..text("1", "Cancel Download")
        }]);
        let report = assess_liveness(&snapshot);
        assert!(report.cancel_present);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_returns_on_completion_surface() {
        let app = FakeApp::builder()
            .progress(vec![Tick::text(10.0), Tick::text(50.0), Tick::text(90.0)])
            .build();
        app.start_job();

        let config = config();
        let monitor = ProgressMonitor::new(&app, &config, "Download Complete");
        let report = monitor.watch().await.unwrap();
        assert_eq!(report.completion, CompletionSignal::Surface);
        assert_eq!(report.last_percentage, Some(90.0));
        assert_eq!(report.polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_tolerates_late_indicator() {
        let app = FakeApp::builder()
            .progress(vec![
                Tick::hidden(),
                Tick::hidden(),
                Tick::bar(30.0),
                Tick::bar(60.0),
            ])
            .build();
        app.start_job();

        let config = config();
        let monitor = ProgressMonitor::new(&app, &config, "Download Complete");
        let report = monitor.watch().await.unwrap();
        assert_eq!(report.completion, CompletionSignal::Surface);
        assert_eq!(report.last_percentage, Some(60.0));
        assert_eq!(report.polls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_times_out_at_ceiling() {
        let app = FakeApp::builder()
            .progress(vec![Tick::text(5.0); 1])
            .hold_last()
            .build();
        app.start_job();

        let config = MonitorConfig {
            ceiling_secs: 30,
            max_no_progress_checks: 1_000,
            ..config()
        };
        let monitor = ProgressMonitor::new(&app, &config, "Download Complete");
        let err = monitor.watch().await.unwrap_err();
        assert!(matches!(err, HarvestError::MonitoringTimeout(30)));
        assert!(err.to_string().contains("monitoring timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_declares_freeze_after_grace() {
        // 42% for 7 polls with an active job, then 7 more polls with nothing active.
        let mut ticks = vec![Tick::text(42.0).active(); 7];
        ticks.extend(vec![Tick::text(42.0); 7]);
        let app = FakeApp::builder().progress(ticks).hold_last().build();
        app.start_job();

        let config = config();
        let monitor = ProgressMonitor::new(&app, &config, "Download Complete");
        match monitor.watch().await {
            Err(HarvestError::ProgressFrozen(label)) => assert_eq!(label, "42%"),
            other => panic!("expected freeze, got {other:?}"),
        }
        assert_eq!(app.snapshots_taken(), 13);
    }
}
