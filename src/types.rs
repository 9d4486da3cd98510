//! Core data types shared by capture, synchronization and recording

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one of the two cameras in the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraId {
    /// First camera (typically face-on)
    Primary,
    /// Second camera (typically down-the-line)
    Secondary,
}

impl CameraId {
    pub const ALL: [CameraId; 2] = [CameraId::Primary, CameraId::Secondary];

    /// Zero-based slot index
    pub fn index(self) -> usize {
        match self {
            CameraId::Primary => 0,
            CameraId::Secondary => 1,
        }
    }

    /// Label used in file names and logs
    pub fn label(self) -> &'static str {
        match self {
            CameraId::Primary => "camera1",
            CameraId::Secondary => "camera2",
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one RGB24 frame at this resolution
    pub fn rgb_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A captured RGB24 frame.
///
/// Frames are immutable once captured. The pixel buffer is reference counted
/// so handing a frame to the motion detector does not copy pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera: CameraId,
    /// Strictly increasing per camera, starting at 1
    pub sequence: u64,
    /// Capture instant on the rig's shared monotonic clock
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl Frame {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Two frames, one per camera, captured within the sync tolerance
#[derive(Debug, Clone)]
pub struct FramePair {
    pub primary: Frame,
    pub secondary: Frame,
    /// `|primary.timestamp_us - secondary.timestamp_us|`
    pub sync_skew_us: u64,
}

impl FramePair {
    /// Pair a frame from each camera. Returns `None` when the frames come from
    /// the same camera.
    pub fn new(a: Frame, b: Frame) -> Option<Self> {
        let (primary, secondary) = match (a.camera, b.camera) {
            (CameraId::Primary, CameraId::Secondary) => (a, b),
            (CameraId::Secondary, CameraId::Primary) => (b, a),
            _ => return None,
        };
        let sync_skew_us = primary.timestamp_us.abs_diff(secondary.timestamp_us);
        Some(Self {
            primary,
            secondary,
            sync_skew_us,
        })
    }

    /// Timestamp of the later frame of the pair
    pub fn timestamp_us(&self) -> u64 {
        self.primary.timestamp_us.max(self.secondary.timestamp_us)
    }

    pub fn frame(&self, camera: CameraId) -> &Frame {
        match camera {
            CameraId::Primary => &self.primary,
            CameraId::Secondary => &self.secondary,
        }
    }
}

/// Stream parameters a video writer is opened with
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    pub resolution: Resolution,
    pub fps: f64,
}

impl VideoParams {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(camera: CameraId, ts: u64) -> Frame {
        Frame {
            camera,
            sequence: 1,
            timestamp_us: ts,
            width: 2,
            height: 2,
            pixels: Bytes::from(vec![0u8; 12]),
        }
    }

    #[test]
    fn test_pair_orders_cameras() {
        let pair = FramePair::new(frame(CameraId::Secondary, 1_000), frame(CameraId::Primary, 1_400))
            .expect("pair");
        assert_eq!(pair.primary.camera, CameraId::Primary);
        assert_eq!(pair.sync_skew_us, 400);
        assert_eq!(pair.timestamp_us(), 1_400);
    }

    #[test]
    fn test_pair_rejects_same_camera() {
        assert!(FramePair::new(frame(CameraId::Primary, 1), frame(CameraId::Primary, 2)).is_none());
    }

    #[test]
    fn test_camera_labels() {
        assert_eq!(CameraId::Primary.label(), "camera1");
        assert_eq!(CameraId::Secondary.to_string(), "camera2");
        assert_eq!(Resolution::new(4, 2).rgb_len(), 24);
    }
}
