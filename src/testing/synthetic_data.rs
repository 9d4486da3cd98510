//! Synthetic frames and a paced synthetic camera
//!
//! Lets the whole rig run offline: unit tests, integration tests and the
//! CLI's `--synthetic` mode all drive capture through [`SyntheticSource`].

use bytes::Bytes;
use std::thread;
use std::time::{Duration, Instant};

use crate::capture::{FrameSource, RawFrame, SourceFormat};
use crate::errors::RigError;
use crate::types::{CameraId, Frame, FramePair};

/// RGB24 gradient that shifts with `frame_number`, so consecutive frames
/// differ everywhere
pub fn gradient_pixels(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; width as usize * height as usize * 3];
    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    data
}

/// A gradient frame with explicit sequence and timestamp
pub fn synthetic_frame(
    camera: CameraId,
    sequence: u64,
    timestamp_us: u64,
    width: u32,
    height: u32,
) -> Frame {
    Frame {
        camera,
        sequence,
        timestamp_us,
        width,
        height,
        pixels: Bytes::from(gradient_pixels(sequence, width, height)),
    }
}

/// A single-colour frame with every channel set to `value`
pub fn solid_frame(camera: CameraId, sequence: u64, width: u32, height: u32, value: u8) -> Frame {
    Frame {
        camera,
        sequence,
        timestamp_us: sequence * 16_667,
        width,
        height,
        pixels: Bytes::from(vec![value; width as usize * height as usize * 3]),
    }
}

/// Two perfectly aligned frames at 60 fps spacing
pub fn synthetic_pair(sequence: u64, width: u32, height: u32) -> FramePair {
    let ts = sequence * 16_667;
    FramePair {
        primary: synthetic_frame(CameraId::Primary, sequence, ts, width, height),
        secondary: synthetic_frame(CameraId::Secondary, sequence, ts, width, height),
        sync_skew_us: 0,
    }
}

/// Periodic bursts of scene change, static in between
#[derive(Debug, Clone, Copy)]
struct MotionPattern {
    period: Duration,
    burst: Duration,
}

/// Frame source producing gradient frames at a fixed rate
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    paced: bool,
    fail_open: bool,
    fail_after: Option<u64>,
    motion: Option<MotionPattern>,
    camera: CameraId,
    frames: u64,
    started: Option<Instant>,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            paced: true,
            fail_open: false,
            fail_after: None,
            motion: None,
            camera: CameraId::Primary,
            frames: 0,
            started: None,
            next_due: None,
        }
    }

    /// `open` fails as if the device were missing
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Deliver `frames` frames, then fail every read
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Return frames as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Static scene except for a `burst` of change at the start of every
    /// `period`
    pub fn with_motion_bursts(mut self, period: Duration, burst: Duration) -> Self {
        self.motion = Some(MotionPattern { period, burst });
        self
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames
    }

    fn pattern_index(&self, now: Instant) -> u64 {
        match (self.motion, self.started) {
            (Some(m), Some(started)) if !m.period.is_zero() => {
                let phase = now.duration_since(started).as_nanos() % m.period.as_nanos();
                if phase < m.burst.as_nanos() {
                    self.frames * 40
                } else {
                    0
                }
            }
            _ => self.frames,
        }
    }

    fn pace(&mut self) {
        if !self.paced {
            return;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval);
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, format: &SourceFormat) -> Result<(), RigError> {
        self.camera = format.camera;
        if self.fail_open {
            return Err(RigError::device(format.camera, "synthetic device refused to open"));
        }
        self.started = Some(Instant::now());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, RigError> {
        if self.fail_after.map_or(false, |n| self.frames >= n) {
            thread::sleep(Duration::from_millis(1));
            return Err(RigError::device(self.camera, "synthetic read failure"));
        }
        self.pace();
        let pixels = gradient_pixels(self.pattern_index(Instant::now()), self.width, self.height);
        self.frames += 1;
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            pixels: Bytes::from(pixels),
        })
    }

    fn describe(&self) -> String {
        format!(
            "synthetic {}x{} @ {:.0} fps",
            self.width,
            self.height,
            1.0 / self.interval.as_secs_f64()
        )
    }
}
