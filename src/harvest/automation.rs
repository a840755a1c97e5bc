//! UI automation for a single mode attempt.
//!
//! [`HarvestAutomation`] walks the application through
//! select mode → configure output → save → start → monitor → close/cancel,
//! retrying element lookups and then the whole sequence. Nothing escapes
//! [`HarvestAutomation::run`]: failures come back inside [`AutomationResult`].

use async_trait::async_trait;
use chrono::Local;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::locator::{self, contains_phrase, ElementClass};
use super::monitor::{CompletionSignal, MonitorReport, ProgressMonitor};
use crate::config::{AutomationConfig, MonitorConfig};
use crate::control::{ElementRef, ElementSnapshot};
use crate::error::HarvestError;
use crate::model::{HarvestMode, HarvestRequest};
use crate::traits::{ControlSurface, ModeRunner};

/// Position of the sequence. Variants are ordered by progress through a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AutomationState {
    Idle,
    ModeSelected,
    ConfigOpened,
    OutputSet,
    ConfigSaved,
    Started,
    Monitoring,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for AutomationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one mode attempt as seen by the UI.
#[derive(Debug)]
pub struct AutomationResult {
    pub success: bool,
    /// Error of the last sequence when unsuccessful
    pub error: Option<HarvestError>,
    pub final_state: AutomationState,
    /// Sequences run, retries included
    pub sequences: u32,
}

impl AutomationResult {
    pub fn reason(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

pub struct HarvestAutomation<S: ControlSurface> {
    surface: S,
    config: AutomationConfig,
    monitor: MonitorConfig,
    state: AutomationState,
}

impl<S: ControlSurface> HarvestAutomation<S> {
    pub fn new(surface: S, config: AutomationConfig, monitor: MonitorConfig) -> Self {
        Self {
            surface,
            config,
            monitor,
            state: AutomationState::Idle,
        }
    }

    pub fn state(&self) -> AutomationState {
        self.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Hands the surface back so the caller can disconnect it.
    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Runs the sequence for `mode`, retrying it up to `sequence_retries` times.
    #[instrument(skip_all, fields(mode = %mode))]
    pub async fn run(
        &mut self,
        mode: HarvestMode,
        request: &HarvestRequest,
        output_dir: &Path,
    ) -> AutomationResult {
        let max_sequences = self.config.sequence_retries.max(1);
        let mut last_error = None;

        for sequence in 1..=max_sequences {
            self.state = AutomationState::Idle;
            match self.run_sequence(mode, request, output_dir).await {
                Ok(()) => {
                    info!(sequence, "Harvest sequence completed");
                    return AutomationResult {
                        success: true,
                        error: None,
                        final_state: self.state,
                        sequences: sequence,
                    };
                }
                Err(e) => {
                    let reached = self.state;
                    warn!(
                        sequence,
                        max = max_sequences,
                        state = %reached,
                        error = %e,
                        "Harvest sequence failed"
                    );
                    self.cleanup(reached).await;
                    self.state = if reached >= AutomationState::Monitoring {
                        AutomationState::Cancelled
                    } else {
                        AutomationState::Failed
                    };
                    last_error = Some(e);
                }
            }

            if sequence < max_sequences {
                sleep(Duration::from_millis(self.config.sequence_retry_delay_ms)).await;
            }
        }

        AutomationResult {
            success: false,
            error: last_error,
            final_state: self.state,
            sequences: max_sequences,
        }
    }

    async fn run_sequence(
        &mut self,
        mode: HarvestMode,
        request: &HarvestRequest,
        output_dir: &Path,
    ) -> Result<(), HarvestError> {
        self.select_mode(mode, request).await?;
        self.state = AutomationState::ModeSelected;

        self.open_output_settings().await?;
        self.state = AutomationState::ConfigOpened;

        self.set_output_path(output_dir).await?;
        self.state = AutomationState::OutputSet;

        self.save().await?;
        self.state = AutomationState::ConfigSaved;

        self.start().await?;
        self.state = AutomationState::Started;

        self.state = AutomationState::Monitoring;
        let report = ProgressMonitor::new(&self.surface, &self.monitor, &self.config.completion_title)
            .watch()
            .await?;
        info!(
            polls = report.polls,
            grace_used = report.grace_used,
            completion = ?report.completion,
            "Monitoring finished"
        );

        self.close_completion(&report).await;
        self.state = AutomationState::Completed;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    async fn select_mode(
        &self,
        mode: HarvestMode,
        request: &HarvestRequest,
    ) -> Result<(), HarvestError> {
        let class = ElementClass::for_mode(mode);
        let element = self.find(class).await?;
        if element.disabled {
            return Err(HarvestError::ControlDisabled(class));
        }
        self.click(&element.handle).await?;
        debug!(%mode, "Mode selected");

        if mode == HarvestMode::DateRange {
            self.set_dates(request).await?;
        }
        Ok(())
    }

    async fn set_dates(&self, request: &HarvestRequest) -> Result<(), HarvestError> {
        if let Some(warning) = request.date_range_warning() {
            warn!(%warning, "Date range is inverted or empty");
        }

        let today = Local::now().date_naive();
        let (from, to) = request.date_window(today, self.config.default_range_days);
        let from = from.format(&self.config.date_format).to_string();
        let to = to.format(&self.config.date_format).to_string();

        for (class, value) in [(ElementClass::FromDate, from), (ElementClass::ToDate, to)] {
            let field = self.find(class).await?;
            self.surface.set_value(&field.handle, &value).await?;
            let read_back = self.surface.read_value(&field.handle).await?;
            if read_back.trim() != value {
                warn!(%class, expected = %value, actual = %read_back, "Date field did not keep value");
            }
        }
        self.pause().await;
        Ok(())
    }

    async fn open_output_settings(&self) -> Result<(), HarvestError> {
        let button = self.find(ElementClass::OutputSettings).await?;
        self.click(&button.handle).await
    }

    async fn set_output_path(&self, output_dir: &Path) -> Result<(), HarvestError> {
        let expected = output_dir.display().to_string();
        let field = self.find(ElementClass::OutputPath).await?;
        self.surface.set_value(&field.handle, &expected).await?;

        let actual = self.surface.read_value(&field.handle).await?;
        if actual.trim() != expected {
            return Err(HarvestError::ValueNotCommitted {
                class: ElementClass::OutputPath,
                expected,
                actual,
            });
        }
        debug!(path = %expected, "Output path set");
        self.pause().await;
        Ok(())
    }

    async fn save(&self) -> Result<(), HarvestError> {
        let button = self.find(ElementClass::Save).await?;
        self.click(&button.handle).await
    }

    async fn start(&self) -> Result<(), HarvestError> {
        let button = self.find(ElementClass::Start).await?;
        if button.disabled {
            return Err(HarvestError::ControlDisabled(ElementClass::Start));
        }
        self.click(&button.handle).await?;
        info!("Harvest started");
        Ok(())
    }

    async fn close_completion(&self, report: &MonitorReport) {
        if report.completion != CompletionSignal::Surface {
            return;
        }
        let snapshot = match self.surface.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Could not re-read completion surface");
                return;
            }
        };
        let Some(surface) = locator::locate_completion_surface(&snapshot, &self.config.completion_title)
        else {
            return;
        };
        let container = surface.handle.clone();
        let close = locator::locate_within(&snapshot, ElementClass::CompletionClose, Some(&container))
            .or_else(|_| locator::locate(&snapshot, ElementClass::CompletionClose));
        match close {
            Ok(button) => {
                if let Err(e) = self.surface.click(&button.handle).await {
                    warn!(error = %e, "Failed to close completion surface");
                }
            }
            Err(e) => warn!(error = %e, "Completion surface has no close control"),
        }
    }

    // ------------------------------------------------------------------
    // Cancellation and cleanup
    // ------------------------------------------------------------------

    /// Layered cancellation: a start button toggled into cancel, then an explicit
    /// cancel control, then stop/abort. Returns whether any click landed.
    pub async fn cancel_job(&self) -> bool {
        let snapshot = match self.surface.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Cancellation skipped, surface unreadable");
                return false;
            }
        };

        let toggle = locator::locate(&snapshot, ElementClass::Start).ok().filter(|e| {
            let text = e.text.to_lowercase();
            contains_phrase(&text, "cancel") || contains_phrase(&text, "stop")
        });
        let layers = [
            ("toggle", toggle),
            ("cancel", locator::locate(&snapshot, ElementClass::Cancel).ok()),
            ("stop", locator::locate(&snapshot, ElementClass::Stop).ok()),
        ];

        for (layer, element) in layers {
            let Some(element) = element else {
                continue;
            };
            match self.surface.click(&element.handle).await {
                Ok(()) => {
                    info!(layer, "Harvest cancelled");
                    return true;
                }
                Err(e) => debug!(layer, error = %e, "Cancellation layer failed"),
            }
        }

        warn!("No cancellation control responded");
        false
    }

    /// Brings the UI back to a neutral state after a failed sequence.
    async fn cleanup(&self, reached: AutomationState) {
        if reached < AutomationState::ConfigOpened {
            return;
        }
        if reached >= AutomationState::Started {
            self.cancel_job().await;
        }

        let snapshot = match self.surface.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Cleanup skipped, surface unreadable");
                return;
            }
        };
        let handles: Vec<ElementRef> = snapshot.dialogs().map(|d| d.handle.clone()).collect();
        for dialog in handles {
            let dismiss = locator::locate_within(&snapshot, ElementClass::Cancel, Some(&dialog))
                .or_else(|_| {
                    locator::locate_within(&snapshot, ElementClass::CompletionClose, Some(&dialog))
                });
            if let Ok(button) = dismiss {
                if let Err(e) = self.surface.click(&button.handle).await {
                    debug!(dialog = %dialog, error = %e, "Failed to dismiss dialog");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Re-snapshots and retries the lookup up to `element_retries` times.
    async fn find(&self, class: ElementClass) -> Result<ElementSnapshot, HarvestError> {
        let attempts = self.config.element_retries.max(1);
        let mut attempt = 1;
        loop {
            let snapshot = self.surface.snapshot().await?;
            match locator::locate(&snapshot, class) {
                Ok(element) => return Ok(element.clone()),
                Err(e) if attempt >= attempts => return Err(e),
                Err(_) => {
                    debug!(%class, attempt, "Element not yet present, retrying");
                    attempt += 1;
                    sleep(Duration::from_millis(self.config.element_retry_delay_ms)).await;
                }
            }
        }
    }

    async fn click(&self, element: &ElementRef) -> Result<(), HarvestError> {
        self.surface.click(element).await?;
        self.pause().await;
        Ok(())
    }

    async fn pause(&self) {
        if self.config.step_delay_ms > 0 {
            sleep(Duration::from_millis(self.config.step_delay_ms)).await;
        }
    }
}

#[async_trait]
impl<S: ControlSurface> ModeRunner for HarvestAutomation<S> {
    async fn run_mode(
        &mut self,
        mode: HarvestMode,
        request: &HarvestRequest,
        output_dir: &Path,
    ) -> AutomationResult {
        self.run(mode, request, output_dir).await
    }
}
