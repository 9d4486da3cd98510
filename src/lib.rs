//! swingcam: dual-camera synchronized capture with motion-triggered recording
//!
//! Two cameras are captured on their own threads against one shared clock,
//! paired frame-by-frame within a timing tolerance, and written to two
//! parallel video files whenever a recording session is active. Sessions are
//! started and stopped by hand or by a motion detector watching one camera.
//!
//! # Features
//! - `camera`: physical cameras through nokhwa
//! - `recording`: H.264/MP4 output through openh264 and muxide
//!
//! Without `camera` the rig runs on [`testing::SyntheticSource`]s; without
//! `recording` sessions fall back to Motion-JPEG or raw RGB files.
//!
//! # Usage
//! ```rust,ignore
//! use swingcam::{DualCameraRig, RigConfig};
//!
//! swingcam::init_logging();
//! let rig = DualCameraRig::builder(RigConfig::load_or_default()).build()?;
//! rig.set_auto_mode(true)?;
//! // ... later
//! println!("{}", serde_json::to_string_pretty(&rig.status())?);
//! rig.shutdown();
//! ```

pub mod capture;
pub mod config;
pub mod controller;
pub mod detector;
pub mod errors;
pub mod events;
#[cfg(feature = "camera")]
pub mod platform;
pub mod recording;
pub mod rig;
pub mod ring_buffer;
pub mod sync;
pub mod timing;
pub mod types;

// Synthetic sources and scripted doubles for offline runs
pub mod testing;

pub use config::RigConfig;
pub use controller::SessionController;
pub use detector::{DetectorCommand, DetectorState, DetectorThresholds, MotionDetector};
pub use errors::RigError;
pub use events::RigEvent;
pub use recording::{Codec, RecordingSession, RecordingSink};
pub use rig::{DualCameraRig, RigBuilder, RigStatus};
pub use sync::FrameSynchronizer;
pub use types::{CameraId, Frame, FramePair, Resolution, VideoParams};

/// Initialize logging; honours `RUST_LOG`, defaults to `swingcam=info`
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("swingcam=info");
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        assert_eq!(NAME, "swingcam");
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
