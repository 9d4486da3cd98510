//! Camera device abstraction consumed by capture workers

use bytes::Bytes;

use crate::errors::RigError;
use crate::types::{CameraId, Resolution};

/// Pixels returned by one successful device read, RGB24
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

/// Requested capture format
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFormat {
    pub camera: CameraId,
    pub device_id: String,
    pub resolution: Resolution,
    pub fps: u32,
}

/// A blocking frame producer owned by exactly one capture worker.
///
/// `read_frame` is the only call made on the worker's acquisition thread in
/// steady state; it may block until the device delivers the next frame.
pub trait FrameSource: Send {
    /// Open the device with the requested format
    fn open(&mut self, format: &SourceFormat) -> Result<(), RigError>;

    /// Block until the next frame is available
    fn read_frame(&mut self) -> Result<RawFrame, RigError>;

    /// Re-establish the device after a failed read
    fn reopen(&mut self) -> Result<(), RigError> {
        Ok(())
    }

    /// Release the device
    fn close(&mut self) {}

    /// Human readable description for logs
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self, format: &SourceFormat) -> Result<(), RigError> {
        (**self).open(format)
    }

    fn read_frame(&mut self) -> Result<RawFrame, RigError> {
        (**self).read_frame()
    }

    fn reopen(&mut self) -> Result<(), RigError> {
        (**self).reopen()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
