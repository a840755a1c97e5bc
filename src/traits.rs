use async_trait::async_trait;
use std::path::Path;

use crate::control::{ElementRef, UiSnapshot};
use crate::error::{ControlError, HarvestError};
use crate::harvest::automation::AutomationResult;
use crate::model::{HarvestMode, HarvestRequest};

/// A controllable UI surface reached over the remote control channel.
///
/// Exactly one action is in flight at a time; implementations do not need to
/// support concurrent callers.
#[async_trait]
pub trait ControlSurface: Send + Sync {
    /// Captures the elements of interest currently in the document.
    async fn snapshot(&self) -> Result<UiSnapshot, ControlError>;

    async fn click(&self, element: &ElementRef) -> Result<(), ControlError>;

    /// Writes a value and fires the input/change events frameworks listen for.
    async fn set_value(&self, element: &ElementRef, value: &str) -> Result<(), ControlError>;

    async fn read_value(&self, element: &ElementRef) -> Result<String, ControlError>;

    /// Trivial readiness query used to confirm the surface answers.
    async fn ready(&self) -> Result<bool, ControlError>;
}

/// Opens and releases sessions against the application's control endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    type Surface: ControlSurface;

    /// Connects, retrying up to `max_retries` times.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::ConnectionExhausted`] once every attempt failed.
    async fn connect(&self, max_retries: u32) -> Result<Self::Surface, HarvestError>;

    /// Best-effort release. Never fails; problems are logged.
    async fn disconnect(&self, surface: Self::Surface);
}

/// Starts and stops the external application.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    type Handle: Send + Sync;

    /// Sweeps stragglers, starts the application and confirms it stayed up.
    async fn launch(&self) -> Result<Self::Handle, HarvestError>;

    /// Terminates the process and any stragglers. When this returns the process
    /// is confirmed dead.
    async fn terminate(&self, handle: Self::Handle);
}

/// Runs the UI automation for a single mode.
#[async_trait]
pub trait ModeRunner: Send {
    async fn run_mode(
        &mut self,
        mode: HarvestMode,
        request: &HarvestRequest,
        output_dir: &Path,
    ) -> AutomationResult;
}
