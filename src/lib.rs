pub mod config;
pub mod control;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod process;
pub mod traits;

// Re-export common types for convenience
pub use config::HarvestConfig;
pub use error::{ControlError, HarvestError, Result};
pub use harvest::{HarvestAutomation, HarvestSupervisor};
pub use model::*;
pub use process::{ProcessHandle, ProcessLauncher};
pub use traits::*;
