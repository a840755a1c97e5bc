use std::path::PathBuf;
use thiserror::Error;

use crate::harvest::locator::ElementClass;
use crate::model::exit_codes;

/// Failures of the remote control channel itself.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Target discovery over HTTP failed
    #[error("Target discovery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No page target exposes a debugger URL
    #[error("No controllable page target on {0}")]
    NoTarget(String),

    /// The endpoint answered with a protocol-level error
    #[error("Protocol error in {method}: {message}")]
    Protocol { method: String, message: String },

    /// An evaluated script threw
    #[error("Script raised an exception: {0}")]
    Script(String),

    /// The referenced element is no longer in the document
    #[error("Element '{0}' is no longer attached")]
    StaleElement(String),

    #[error("Command '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Connection closed by remote end")]
    Closed,

    /// The page answered but is not ready to be driven
    #[error("Surface not ready: {0}")]
    NotReady(String),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Error taxonomy of the harvest core.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Failed to launch application: {0}")]
    LaunchFailed(String),

    #[error("Remote control connection exhausted after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("Element not located: {0}")]
    ElementNotLocated(ElementClass),

    #[error("Progress frozen at {0}")]
    ProgressFrozen(String),

    #[error("monitoring timeout after {0}s")]
    MonitoringTimeout(u64),

    #[error("Output directory contains no files: {}", .0.display())]
    VerificationEmpty(PathBuf),

    /// Control was found but cannot be activated
    #[error("Control is disabled: {0}")]
    ControlDisabled(ElementClass),

    /// A value written to a field did not read back
    #[error("Value for {class} was not committed: expected '{expected}', read '{actual}'")]
    ValueNotCommitted {
        class: ElementClass,
        expected: String,
        actual: String,
    },

    #[error("Remote control error: {0}")]
    Control(#[from] ControlError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Errors that end the current cycle attempt before the ladder runs.
    pub fn aborts_cycle(&self) -> bool {
        matches!(
            self,
            Self::LaunchFailed(_) | Self::ConnectionExhausted { .. }
        )
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) => exit_codes::CONFIG_INVALID,
            Self::ConnectionExhausted { .. } => exit_codes::CONNECTION_EXHAUSTED,
            _ => exit_codes::AUTOMATION_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_launch_and_connection_abort_cycle() {
        assert!(HarvestError::LaunchFailed("exited".into()).aborts_cycle());
        assert!(HarvestError::ConnectionExhausted {
            attempts: 5,
            last_error: "refused".into()
        }
        .aborts_cycle());
        assert!(!HarvestError::ElementNotLocated(ElementClass::Save).aborts_cycle());
        assert!(!HarvestError::MonitoringTimeout(60).aborts_cycle());
    }

    #[test]
    fn test_messages_carry_context() {
        let frozen = HarvestError::ProgressFrozen("42%".into());
        assert_eq!(frozen.to_string(), "Progress frozen at 42%");

        let missing = HarvestError::ElementNotLocated(ElementClass::Start);
        assert!(missing.to_string().contains("start"));

        let timeout = HarvestError::MonitoringTimeout(3600);
        assert!(timeout.to_string().starts_with("monitoring timeout"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            HarvestError::InvalidConfig("x".into()).exit_code(),
            exit_codes::CONFIG_INVALID
        );
        assert_eq!(
            HarvestError::ConnectionExhausted {
                attempts: 1,
                last_error: String::new()
            }
            .exit_code(),
            exit_codes::CONNECTION_EXHAUSTED
        );
        assert_eq!(
            HarvestError::ProgressFrozen("1%".into()).exit_code(),
            exit_codes::AUTOMATION_FAILED
        );
    }
}
