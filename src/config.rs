//! Configuration management for swingcam
//!
//! Provides loading, saving and validation of camera, synchronization,
//! detector and recording settings stored as TOML.

use crate::capture::{CaptureSettings, ReconnectPolicy};
use crate::detector::DetectorThresholds;
use crate::errors::RigError;
use crate::recording::{Codec, SinkSettings};
use crate::types::{CameraId, Resolution};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub cameras: CamerasConfig,
    pub sync: SyncConfig,
    pub detector: DetectorConfig,
    pub recording: RecordingConfig,
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CamerasConfig {
    /// Device id of the primary camera (index for native backends)
    pub primary_device: String,
    /// Device id of the secondary camera
    pub secondary_device: String,
    /// Requested resolution [width, height]
    pub resolution: [u32; 2],
    /// Requested frames per second
    pub fps: u32,
    /// Capacity of each capture queue
    pub queue_capacity: usize,
    /// Time allowed for the first frame after opening a device
    pub startup_grace_ms: u64,
    /// Poll interval while waiting for the first frame
    pub warmup_poll_ms: u64,
    /// Read retries before a device is declared lost
    pub reconnect_attempts: u32,
    /// Upper bound on the total time spent retrying
    pub reconnect_window_ms: u64,
    /// First backoff delay, doubled on each retry
    pub reconnect_base_delay_ms: u64,
}

/// Frame synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum pairing skew; one frame interval when unset
    pub tolerance_ms: Option<f64>,
    /// Synchronizer polling interval
    pub tick_ms: u64,
}

/// Motion detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Start in automatic (motion-triggered) mode
    pub auto_mode: bool,
    /// Camera whose frames feed the detector
    pub camera_of_interest: CameraId,
    pub motion_threshold: f64,
    pub release_threshold: f64,
    pub confirmation_frames: u32,
    pub release_confirmation_frames: u32,
    pub cooldown_ms: u64,
    /// Target detector samples per second when `subsample_factor` is unset
    pub target_sample_rate_hz: f64,
    /// Process every Nth synchronized pair
    pub subsample_factor: Option<u32>,
    /// Report the signal relative to a resting baseline
    pub use_baseline: bool,
}

/// Recording sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_directory: String,
    pub file_prefix: String,
    /// Codec preference list, first usable wins
    pub codecs: Vec<Codec>,
    /// Per-session write buffer capacity (pairs)
    pub write_buffer_capacity: usize,
    /// Consecutive buffer drops treated as a failed disk
    pub chronic_drop_limit: u32,
    /// JPEG quality for Motion-JPEG (1-100)
    pub jpeg_quality: u8,
    /// H.264 target bitrate in bits per second
    pub bitrate: u32,
    /// Container frame rate cap
    pub max_fps: f64,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            primary_device: "0".to_string(),
            secondary_device: "1".to_string(),
            resolution: [1280, 720],
            fps: 60,
            queue_capacity: 2,
            startup_grace_ms: 2000,
            warmup_poll_ms: 100,
            reconnect_attempts: 5,
            reconnect_window_ms: 3000,
            reconnect_base_delay_ms: 100,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: None,
            tick_ms: 5,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            auto_mode: false,
            camera_of_interest: CameraId::Primary,
            motion_threshold: 15.0,
            release_threshold: 5.0,
            confirmation_frames: 5,
            release_confirmation_frames: 3,
            cooldown_ms: 2000,
            target_sample_rate_hz: 15.0,
            subsample_factor: None,
            use_baseline: true,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_directory: "./recordings".to_string(),
            file_prefix: "dual_capture".to_string(),
            codecs: Codec::DEFAULT_PREFERENCE.to_vec(),
            write_buffer_capacity: 8,
            chronic_drop_limit: 30,
            jpeg_quality: 90,
            bitrate: 5_000_000,
            max_fps: 120.0,
        }
    }
}

impl RigConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| RigError::invalid(format!("Failed to read config file: {}", e)))?;

        let config: RigConfig = toml::from_str(&contents)
            .map_err(|e| RigError::invalid(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| RigError::invalid(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("swingcam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), RigError> {
        let cams = &self.cameras;
        if cams.resolution[0] == 0 || cams.resolution[1] == 0 {
            return Err(RigError::invalid("Invalid camera resolution"));
        }
        if cams.fps == 0 || cams.fps > 240 {
            return Err(RigError::invalid("Invalid camera FPS (must be 1-240)"));
        }
        if cams.primary_device == cams.secondary_device {
            return Err(RigError::invalid("Both cameras use the same device"));
        }
        if cams.queue_capacity == 0 {
            return Err(RigError::invalid("Capture queue capacity must be positive"));
        }
        if cams.startup_grace_ms == 0 || cams.warmup_poll_ms == 0 {
            return Err(RigError::invalid("Startup grace and warm-up poll must be positive"));
        }

        if let Some(tolerance) = self.sync.tolerance_ms {
            if !tolerance.is_finite() || tolerance <= 0.0 {
                return Err(RigError::invalid("Sync tolerance must be positive"));
            }
        }
        if self.sync.tick_ms == 0 {
            return Err(RigError::invalid("Sync tick must be positive"));
        }

        self.thresholds().validate()?;
        if self.detector.subsample_factor == Some(0) {
            return Err(RigError::invalid("Subsample factor must be positive"));
        }
        if !(self.detector.target_sample_rate_hz > 0.0) {
            return Err(RigError::invalid("Detector sample rate must be positive"));
        }

        let rec = &self.recording;
        if rec.codecs.is_empty() {
            return Err(RigError::invalid("Codec preference list is empty"));
        }
        if rec.write_buffer_capacity == 0 || rec.chronic_drop_limit == 0 {
            return Err(RigError::invalid("Write buffer capacity and drop limit must be positive"));
        }
        if rec.jpeg_quality == 0 || rec.jpeg_quality > 100 {
            return Err(RigError::invalid("JPEG quality must be between 1 and 100"));
        }
        if !(rec.max_fps > 0.0) {
            return Err(RigError::invalid("Container FPS cap must be positive"));
        }

        Ok(())
    }

    /// Pairing tolerance in microseconds
    pub fn tolerance_us(&self) -> u64 {
        match self.sync.tolerance_ms {
            Some(ms) => (ms * 1000.0).round() as u64,
            None => (1_000_000.0 / self.cameras.fps.max(1) as f64).round() as u64,
        }
    }

    /// Every Nth synchronized pair is handed to the detector
    pub fn subsample_factor(&self) -> u32 {
        match self.detector.subsample_factor {
            Some(n) => n.max(1),
            None => {
                let n = (self.cameras.fps as f64 / self.detector.target_sample_rate_hz).round();
                (n as u32).max(1)
            }
        }
    }

    pub fn thresholds(&self) -> DetectorThresholds {
        let d = &self.detector;
        DetectorThresholds {
            motion_threshold: d.motion_threshold,
            release_threshold: d.release_threshold,
            confirmation_frames: d.confirmation_frames,
            release_confirmation_frames: d.release_confirmation_frames,
            cooldown: Duration::from_millis(d.cooldown_ms),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.cameras.resolution[0], self.cameras.resolution[1])
    }

    pub fn device_id(&self, camera: CameraId) -> &str {
        match camera {
            CameraId::Primary => &self.cameras.primary_device,
            CameraId::Secondary => &self.cameras.secondary_device,
        }
    }

    pub fn capture_settings(&self, camera: CameraId) -> CaptureSettings {
        let cams = &self.cameras;
        CaptureSettings {
            device_id: self.device_id(camera).to_string(),
            resolution: self.resolution(),
            target_fps: cams.fps,
            queue_capacity: cams.queue_capacity,
            startup_grace: Duration::from_millis(cams.startup_grace_ms),
            warmup_poll: Duration::from_millis(cams.warmup_poll_ms),
            reconnect: ReconnectPolicy {
                max_attempts: cams.reconnect_attempts,
                window: Duration::from_millis(cams.reconnect_window_ms),
                base_delay: Duration::from_millis(cams.reconnect_base_delay_ms),
            },
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        let rec = &self.recording;
        SinkSettings {
            output_directory: PathBuf::from(&rec.output_directory),
            file_prefix: rec.file_prefix.clone(),
            codecs: rec.codecs.clone(),
            write_buffer_capacity: rec.write_buffer_capacity,
            chronic_drop_limit: rec.chronic_drop_limit,
            fps: (self.cameras.fps as f64).min(rec.max_fps),
        }
    }
}
