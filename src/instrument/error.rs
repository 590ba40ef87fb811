// Error taxonomy shared by every instrument driver

use std::time::Duration;

use crate::transport::TransportError;

/// Error types for instrument communication
#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("Communication timed out waiting for response to {command} (timeout {timeout:?})")]
    CommunicationTimeout { command: String, timeout: Duration },

    #[error("Unknown command {0:?}")]
    UnknownCommand(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Device error {code}: {message}")]
    Device { message: String, code: String },

    #[error("Axis {axis} move did not report completion before {timeout:?} (response so far: {partial:?})")]
    IncompleteMove {
        axis: u8,
        timeout: Duration,
        partial: Vec<String>,
    },

    #[error("Invalid response to {command}: {reason}")]
    InvalidResponse { command: String, reason: String },

    #[error("Invalid kinematics: speed={speed}, acceleration={acceleration}")]
    InvalidKinematics { speed: f64, acceleration: f64 },
}

impl InstrumentError {
    pub(crate) fn invalid_response(command: &str, reason: impl Into<String>) -> Self {
        InstrumentError::InvalidResponse {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure came from the hardware/channel rather than the caller
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            InstrumentError::CommunicationTimeout { .. } | InstrumentError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, InstrumentError>;
