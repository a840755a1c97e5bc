//! Scripted stand-in for the acquisition application, used by the tests.
//!
//! [`FakeApp`] renders a small export UI (mode radios, output settings dialog,
//! start/cancel buttons, progress text and a completion dialog) and plays back a
//! list of [`Tick`]s once the job starts. When the script runs out the job
//! completes and writes the configured number of files into the output path.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::control::{ElementRef, ElementSnapshot, UiSnapshot};
use crate::error::{ControlError, HarvestError};
use crate::traits::{AppLauncher, Connector, ControlSurface};

const COMPLETION_TITLE: &str = "Download Complete";

/// One progress reading shown while the job runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    percentage: Option<f64>,
    bar: bool,
    active: bool,
}

impl Tick {
    /// Percentage rendered as status text.
    pub fn text(percentage: f64) -> Self {
        Self {
            percentage: Some(percentage),
            bar: false,
            active: false,
        }
    }

    /// Percentage rendered as progress markup.
    pub fn bar(percentage: f64) -> Self {
        Self {
            bar: true,
            ..Self::text(percentage)
        }
    }

    pub fn hidden() -> Self {
        Self {
            percentage: None,
            bar: false,
            active: false,
        }
    }

    /// Cancel enabled and start disabled while this tick shows.
    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    // Script
    ticks: Vec<Tick>,
    hold_last: bool,
    files: usize,
    hide_modes_for: u32,
    without_save: bool,
    drop_output_path: bool,
    reformat_dates: bool,
    start_disabled: bool,
    fail_launches: u32,
    unreachable: bool,

    // Session
    selected_mode: Option<String>,
    from_date: Option<String>,
    to_date: Option<String>,
    config_open: bool,
    output_path: String,
    running: bool,
    tick_index: usize,
    current: Option<Tick>,
    completed: bool,

    // Observations
    snapshots: u32,
    job_started: bool,
    completion_closed: bool,
    settings_dismissed: bool,
    cancel_attempted: bool,
    launches: u32,
    live: u32,
    max_live: u32,
    connects: u32,
}

impl State {
    fn reset_session(&mut self) {
        self.selected_mode = None;
        self.from_date = None;
        self.to_date = None;
        self.config_open = false;
        self.output_path.clear();
        self.running = false;
        self.tick_index = 0;
        self.current = None;
        self.completed = false;
    }

    /// Moves the job one step along its script.
    fn advance(&mut self) {
        if !self.running || self.completed {
            return;
        }
        if let Some(tick) = self.ticks.get(self.tick_index).copied() {
            self.tick_index += 1;
            self.current = Some(tick);
        } else if self.hold_last && !self.ticks.is_empty() {
            self.current = self.ticks.last().copied();
        } else {
            self.completed = true;
            self.current = None;
            self.write_files();
        }
    }

    fn write_files(&self) {
        if self.files == 0 || self.output_path.is_empty() {
            return;
        }
        let dir = PathBuf::from(&self.output_path);
        for i in 0..self.files {
            std::fs::write(dir.join(format!("record_{i}.csv")), b"id,value\n1,42\n")
                .expect("fake app writes into the output directory");
        }
    }

    fn render(&self) -> Vec<ElementSnapshot> {
        let modes_visible = self.hide_modes_for == 0;
        let mut elements = vec![
            radio("mode-all", "modeAll", "All records", modes_visible),
            radio("mode-since", "modeSinceLast", "Since last download", modes_visible),
            radio("mode-range", "modeDateRange", "Date range", modes_visible),
        ];

        if self.selected_mode.as_deref() == Some("date_range") {
            elements.push(date_field("from-date", "fromDate", self.from_date.as_deref()));
            elements.push(date_field("to-date", "toDate", self.to_date.as_deref()));
        }

        elements.push(button("settings-btn", Some("outputSettings"), "Output Settings"));

        if self.config_open {
            elements.push(dialog("settings-dialog", "Output Settings"));
            elements.push(ElementSnapshot {
                id: Some("outputPath".into()),
                input_type: Some("text".into()),
                value: Some(self.output_path.clone()),
                container: Some(ElementRef::new("settings-dialog")),
                ..element("path-field", "input")
            });
            if !self.without_save {
                elements.push(ElementSnapshot {
                    container: Some(ElementRef::new("settings-dialog")),
                    ..button("save-btn", Some("saveSettings"), "Save")
                });
            }
            elements.push(ElementSnapshot {
                container: Some(ElementRef::new("settings-dialog")),
                ..button("settings-cancel", None, "Cancel")
            });
        }

        let active = self.current.is_some_and(|t| t.active);
        let job_visible = self.running && !self.completed;
        elements.push(ElementSnapshot {
            disabled: self.start_disabled || (job_visible && active),
            ..button("start-btn", Some("startDownload"), "Start Download")
        });

        if job_visible {
            elements.push(ElementSnapshot {
                disabled: !active,
                ..button("cancel-btn", Some("cancelDownload"), "Cancel")
            });
            match self.current {
                Some(Tick {
                    percentage: Some(value),
                    bar: true,
                    ..
                }) => elements.push(ElementSnapshot {
                    progress: Some(value),
                    ..element("progress", "progress")
                }),
                Some(Tick {
                    percentage: Some(value),
                    ..
                }) => elements.push(ElementSnapshot {
                    text: format!("Records exported: {value}%"),
                    ..element("status", "span")
                }),
                _ => {}
            }
        }

        if self.completed && !self.completion_closed {
            elements.push(dialog("done-dialog", COMPLETION_TITLE));
            elements.push(ElementSnapshot {
                container: Some(ElementRef::new("done-dialog")),
                ..button("done-close", None, "Close")
            });
        }

        elements
    }
}

fn element(handle: &str, tag: &str) -> ElementSnapshot {
    ElementSnapshot {
        handle: ElementRef::new(handle),
        tag: tag.to_string(),
        visible: true,
        ..Default::default()
    }
}

fn button(handle: &str, id: Option<&str>, text: &str) -> ElementSnapshot {
    ElementSnapshot {
        id: id.map(str::to_string),
        text: text.to_string(),
        ..element(handle, "button")
    }
}

fn radio(handle: &str, id: &str, label: &str, visible: bool) -> ElementSnapshot {
    ElementSnapshot {
        id: Some(id.to_string()),
        input_type: Some("radio".into()),
        label: Some(label.to_string()),
        visible,
        ..element(handle, "input")
    }
}

fn date_field(handle: &str, id: &str, value: Option<&str>) -> ElementSnapshot {
    ElementSnapshot {
        id: Some(id.to_string()),
        input_type: Some("date".into()),
        value: value.map(str::to_string),
        ..element(handle, "input")
    }
}

fn dialog(handle: &str, title: &str) -> ElementSnapshot {
    ElementSnapshot {
        role: Some("dialog".into()),
        dialog_title: Some(title.to_string()),
        ..element(handle, "div")
    }
}

impl State {
    fn date_input(&self, value: &str) -> String {
        match chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            Ok(date) if self.reformat_dates => date.format("%d/%m/%Y").to_string(),
            _ => value.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeAppBuilder {
    state: State,
}

impl FakeAppBuilder {
    pub fn progress(mut self, ticks: Vec<Tick>) -> Self {
        self.state.ticks = ticks;
        self
    }

    /// Keep showing the last tick instead of completing.
    pub fn hold_last(mut self) -> Self {
        self.state.hold_last = true;
        self
    }

    /// Files written into the output path on completion.
    pub fn files(mut self, count: usize) -> Self {
        self.state.files = count;
        self
    }

    /// Mode radios are invisible for the first `snapshots` snapshots.
    pub fn hide_modes_for(mut self, snapshots: u32) -> Self {
        self.state.hide_modes_for = snapshots;
        self
    }

    pub fn without_save(mut self) -> Self {
        self.state.without_save = true;
        self
    }

    /// The output path field silently drops what is written to it.
    pub fn drop_output_path(mut self) -> Self {
        self.state.drop_output_path = true;
        self
    }

    /// Date fields store ISO input as `dd/mm/yyyy`, like a localized picker.
    pub fn reformat_dates(mut self) -> Self {
        self.state.reformat_dates = true;
        self
    }

    pub fn start_disabled(mut self) -> Self {
        self.state.start_disabled = true;
        self
    }

    pub fn fail_launches(mut self, count: u32) -> Self {
        self.state.fail_launches = count;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.state.unreachable = true;
        self
    }

    pub fn build(mut self) -> FakeApp {
        if self.state.ticks.is_empty() {
            self.state.ticks = vec![Tick::text(50.0).active()];
        }
        FakeApp {
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}

/// Cloneable handle to one scripted application; clones share state.
#[derive(Debug, Clone)]
pub struct FakeApp {
    state: Arc<Mutex<State>>,
}

impl FakeApp {
    pub fn builder() -> FakeAppBuilder {
        FakeAppBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts the job without going through the UI.
    pub fn start_job(&self) {
        let mut state = self.lock();
        state.running = true;
        state.job_started = true;
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher { app: self.clone() }
    }

    pub fn snapshots_taken(&self) -> u32 {
        self.lock().snapshots
    }

    pub fn selected_mode(&self) -> Option<String> {
        self.lock().selected_mode.clone()
    }

    pub fn output_path(&self) -> String {
        self.lock().output_path.clone()
    }

    pub fn dates(&self) -> (Option<String>, Option<String>) {
        let state = self.lock();
        (state.from_date.clone(), state.to_date.clone())
    }

    pub fn job_started(&self) -> bool {
        self.lock().job_started
    }

    pub fn completion_closed(&self) -> bool {
        self.lock().completion_closed
    }

    pub fn settings_dismissed(&self) -> bool {
        self.lock().settings_dismissed
    }

    pub fn cancel_attempted(&self) -> bool {
        self.lock().cancel_attempted
    }

    pub fn launches(&self) -> u32 {
        self.lock().launches
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn live_processes(&self) -> u32 {
        self.lock().live
    }

    /// Highest number of simultaneously live processes seen.
    pub fn max_live_processes(&self) -> u32 {
        self.lock().max_live
    }
}

#[async_trait]
impl ControlSurface for FakeApp {
    async fn snapshot(&self) -> Result<UiSnapshot, ControlError> {
        let mut state = self.lock();
        state.snapshots += 1;
        state.advance();
        let elements = state.render();
        state.hide_modes_for = state.hide_modes_for.saturating_sub(1);
        Ok(UiSnapshot::new(elements))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), ControlError> {
        let mut state = self.lock();
        match element.as_str() {
            "mode-all" => state.selected_mode = Some("all".into()),
            "mode-since" => state.selected_mode = Some("since_last".into()),
            "mode-range" => state.selected_mode = Some("date_range".into()),
            "settings-btn" => state.config_open = true,
            "save-btn" => state.config_open = false,
            "settings-cancel" => {
                state.config_open = false;
                state.settings_dismissed = true;
            }
            "start-btn" => {
                if !state.start_disabled && !state.running {
                    state.running = true;
                    state.job_started = true;
                    state.tick_index = 0;
                    state.current = None;
                    state.completed = false;
                    state.completion_closed = false;
                }
            }
            "cancel-btn" => {
                state.cancel_attempted = true;
                if state.current.is_some_and(|t| t.active) {
                    state.running = false;
                }
            }
            "done-close" => {
                state.completion_closed = true;
                state.running = false;
            }
            other => return Err(ControlError::StaleElement(other.to_string())),
        }
        Ok(())
    }

    async fn set_value(&self, element: &ElementRef, value: &str) -> Result<(), ControlError> {
        let mut state = self.lock();
        match element.as_str() {
            "path-field" if state.drop_output_path => {}
            "path-field" => state.output_path = value.to_string(),
            "from-date" => {
                let stored = state.date_input(value);
                state.from_date = Some(stored);
            }
            "to-date" => {
                let stored = state.date_input(value);
                state.to_date = Some(stored);
            }
            other => return Err(ControlError::StaleElement(other.to_string())),
        }
        Ok(())
    }

    async fn read_value(&self, element: &ElementRef) -> Result<String, ControlError> {
        let state = self.lock();
        match element.as_str() {
            "path-field" => Ok(state.output_path.clone()),
            "from-date" => Ok(state.from_date.clone().unwrap_or_default()),
            "to-date" => Ok(state.to_date.clone().unwrap_or_default()),
            other => Err(ControlError::StaleElement(other.to_string())),
        }
    }

    async fn ready(&self) -> Result<bool, ControlError> {
        Ok(true)
    }
}

#[async_trait]
impl Connector for FakeApp {
    type Surface = FakeApp;

    async fn connect(&self, max_retries: u32) -> Result<FakeApp, HarvestError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(HarvestError::ConnectionExhausted {
                attempts: max_retries,
                last_error: "connection refused".into(),
            });
        }
        state.connects += 1;
        Ok(self.clone())
    }

    async fn disconnect(&self, _surface: FakeApp) {}
}

pub struct FakeLauncher {
    app: FakeApp,
}

#[derive(Debug)]
pub struct FakeHandle(pub u32);

#[async_trait]
impl AppLauncher for FakeLauncher {
    type Handle = FakeHandle;

    async fn launch(&self) -> Result<FakeHandle, HarvestError> {
        let mut state = self.app.lock();
        state.launches += 1;
        if state.fail_launches > 0 {
            state.fail_launches -= 1;
            return Err(HarvestError::LaunchFailed("process exited during settle".into()));
        }
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        state.reset_session();
        Ok(FakeHandle(state.launches))
    }

    async fn terminate(&self, _handle: FakeHandle) {
        let mut state = self.app.lock();
        state.live = state.live.saturating_sub(1);
        state.running = false;
    }
}
