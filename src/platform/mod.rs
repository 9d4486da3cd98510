//! Physical cameras through nokhwa

use log::{info, warn};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution as NokhwaResolution,
    },
    CallbackCamera,
};
use serde::Serialize;

use bytes::Bytes;

use crate::capture::{FrameSource, RawFrame, SourceFormat};
use crate::errors::RigError;
use crate::types::CameraId;

/// A camera reported by the OS backend
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Enumerate attached cameras
pub fn list_devices() -> Result<Vec<DeviceInfo>, RigError> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|e| RigError::IoError(format!("Failed to query cameras: {}", e)))?;

    Ok(cameras
        .into_iter()
        .map(|info| DeviceInfo {
            id: info.index().to_string(),
            name: info.human_name(),
            description: info.description().to_string(),
        })
        .collect())
}

/// Device format asked of nokhwa for a capture request. MJPEG is what
/// USB cameras offer at high frame rates.
pub fn camera_format(format: &SourceFormat) -> CameraFormat {
    CameraFormat::new(
        NokhwaResolution::new(format.resolution.width, format.resolution.height),
        FrameFormat::MJPEG,
        format.fps,
    )
}

/// [`FrameSource`] backed by a nokhwa camera, decoded to RGB24
pub struct NokhwaSource {
    device_id: String,
    camera_id: CameraId,
    index: u32,
    format: Option<SourceFormat>,
    camera: Option<CallbackCamera>,
}

impl NokhwaSource {
    pub fn new(device_id: &str) -> Result<Self, RigError> {
        let index = device_id.parse::<u32>().map_err(|_| {
            RigError::invalid(format!("Camera device id '{}' is not an index", device_id))
        })?;
        Ok(Self {
            device_id: device_id.to_string(),
            camera_id: CameraId::Primary,
            index,
            format: None,
            camera: None,
        })
    }

    fn connect(&mut self) -> Result<(), RigError> {
        let wanted = self
            .format
            .as_ref()
            .map(camera_format)
            .ok_or_else(|| RigError::device(self.camera_id, "no capture format requested"))?;
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));
        let mut camera = CallbackCamera::new(CameraIndex::Index(self.index), requested, |_| {})
            .map_err(|e| RigError::device(self.camera_id, format!("Failed to initialize: {}", e)))?;
        camera
            .open_stream()
            .map_err(|e| RigError::device(self.camera_id, format!("Failed to start stream: {}", e)))?;

        match camera.camera_format() {
            Ok(actual) if actual.resolution() != wanted.resolution()
                || actual.frame_rate() != wanted.frame_rate() =>
            {
                warn!(
                    "Camera {} delivers {} instead of the requested {}",
                    self.camera_id, actual, wanted
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Camera {} format unknown: {}", self.camera_id, e),
        }

        self.camera = Some(camera);
        Ok(())
    }
}

impl FrameSource for NokhwaSource {
    fn open(&mut self, format: &SourceFormat) -> Result<(), RigError> {
        self.camera_id = format.camera;
        self.format = Some(format.clone());
        self.connect()?;
        info!(
            "Opened camera {} (device {}) requesting {} @ {} fps",
            format.camera, self.device_id, format.resolution, format.fps
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, RigError> {
        let camera_id = self.camera_id;
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| RigError::device(camera_id, "stream not open"))?;

        let buffer = camera
            .poll_frame()
            .map_err(|e| RigError::device(camera_id, format!("Failed to capture frame: {}", e)))?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| RigError::device(camera_id, format!("Failed to decode frame: {}", e)))?;

        let (width, height) = (image.width(), image.height());
        Ok(RawFrame {
            width,
            height,
            pixels: Bytes::from(image.into_raw()),
        })
    }

    fn reopen(&mut self) -> Result<(), RigError> {
        self.close();
        self.connect()
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                warn!("Failed to stop stream on device {}: {}", self.device_id, e);
            }
        }
    }

    fn describe(&self) -> String {
        format!("nokhwa device {}", self.device_id)
    }
}

impl Drop for NokhwaSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;

    #[test]
    fn test_requested_format_follows_capture_request() {
        let format = SourceFormat {
            camera: CameraId::Secondary,
            device_id: "1".to_string(),
            resolution: Resolution::new(1280, 720),
            fps: 120,
        };
        let wanted = camera_format(&format);
        assert_eq!(wanted.resolution(), NokhwaResolution::new(1280, 720));
        assert_eq!(wanted.frame_rate(), 120);
        assert_eq!(wanted.format(), FrameFormat::MJPEG);
    }

    #[test]
    fn test_non_numeric_device_rejected() {
        assert!(matches!(
            NokhwaSource::new("usb-cam"),
            Err(RigError::InvalidConfig(_))
        ));
    }
}
