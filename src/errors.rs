use thiserror::Error;

use crate::types::CameraId;

/// Every failure the capture rig can report.
///
/// Command-level errors (`AlreadyActive`, `NoActiveSession`, `AutoModeActive`,
/// `InvalidConfig`) never change state. `WriteFailed` ends the current session
/// only, `DeviceUnavailable` ends the affected capture worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RigError {
    #[error("Camera {camera} unavailable: {reason}")]
    DeviceUnavailable { camera: CameraId, reason: String },
    #[error("Frame write dropped: {0}")]
    FrameWriteDropped(String),
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("A recording session is already active")]
    AlreadyActive,
    #[error("No active recording session")]
    NoActiveSession,
    #[error("Automatic mode is active; manual commands are rejected")]
    AutoModeActive,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl RigError {
    pub fn device(camera: CameraId, reason: impl Into<String>) -> Self {
        RigError::DeviceUnavailable {
            camera,
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        RigError::InvalidConfig(message.into())
    }
}

impl From<std::io::Error> for RigError {
    fn from(e: std::io::Error) -> Self {
        RigError::IoError(e.to_string())
    }
}
