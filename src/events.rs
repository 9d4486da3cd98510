//! Events delivered to the session controller's supervisor thread

use uuid::Uuid;

use crate::detector::DetectorCommand;
use crate::errors::RigError;
use crate::types::CameraId;

#[derive(Debug, Clone, PartialEq)]
pub enum RigEvent {
    /// A capture worker gave up reconnecting to its device
    DeviceLost { camera: CameraId, reason: String },
    /// The recording sink aborted a session
    SessionFailed { session_id: Uuid, error: RigError },
    /// A command issued by the motion detector on a state transition
    Detector(DetectorCommand),
    /// Stop the supervisor loop
    Shutdown,
}
