//! Per-camera capture workers
//!
//! Each worker owns one [`FrameSource`] and a dedicated acquisition thread.
//! Frames are stamped from the rig's shared clock the moment a read returns
//! and published to a drop-oldest queue that the synchronizer drains.

mod source;

pub use source::{FrameSource, RawFrame, SourceFormat};

use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::errors::RigError;
use crate::events::RigEvent;
use crate::ring_buffer::DropOldestQueue;
use crate::timing::PTSClock;
use crate::types::{CameraId, Frame, Resolution};

/// Bounded exponential backoff for failed reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Retries after the first failed read
    pub max_attempts: u32,
    /// Total time budget across all retries
    pub window: Duration,
    /// Delay before the first retry; doubled for each following one
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), clamped to what is left
    /// of the window
    pub fn delay_for(&self, attempt: u32, elapsed: Duration) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.window.saturating_sub(elapsed))
    }

    /// Whether another retry is allowed after `failures` consecutive failures
    pub fn allows_retry(&self, failures: u32, elapsed: Duration) -> bool {
        failures <= self.max_attempts && elapsed < self.window
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(3),
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Capture worker settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device_id: String,
    pub resolution: Resolution,
    pub target_fps: u32,
    pub queue_capacity: usize,
    pub startup_grace: Duration,
    pub warmup_poll: Duration,
    pub reconnect: ReconnectPolicy,
}

impl CaptureSettings {
    pub fn new(device_id: impl Into<String>, resolution: Resolution, target_fps: u32) -> Self {
        Self {
            device_id: device_id.into(),
            resolution,
            target_fps,
            queue_capacity: 2,
            startup_grace: Duration::from_secs(2),
            warmup_poll: Duration::from_millis(100),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Reconnecting,
    Failed,
    Stopped,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Reconnecting,
            3 => WorkerState::Failed,
            _ => WorkerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Starting => 0,
            WorkerState::Running => 1,
            WorkerState::Reconnecting => 2,
            WorkerState::Failed => 3,
            WorkerState::Stopped => 4,
        }
    }
}

/// Liveness snapshot of one camera
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub camera: CameraId,
    pub device_id: String,
    pub state: WorkerState,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub reconnect_attempts: u64,
    pub last_frame_timestamp_us: Option<u64>,
    pub last_resolution: Option<Resolution>,
}

struct WorkerStatus {
    state: AtomicU8,
    frames_captured: AtomicU64,
    reconnect_attempts: AtomicU64,
    last_timestamp_us: AtomicU64,
    last_width: AtomicU32,
    last_height: AtomicU32,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Starting.as_u8()),
            frames_captured: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            last_timestamp_us: AtomicU64::new(0),
            last_width: AtomicU32::new(0),
            last_height: AtomicU32::new(0),
        }
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// One camera's acquisition thread and its output queue
pub struct CaptureWorker {
    camera: CameraId,
    device_id: String,
    queue: Arc<DropOldestQueue<Frame>>,
    status: Arc<WorkerStatus>,
    stop_flag: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureWorker {
    /// Open the device and start acquiring.
    ///
    /// Fails with `DeviceUnavailable` when the device cannot be opened or
    /// delivers no frame within `settings.startup_grace`.
    pub fn start(
        camera: CameraId,
        mut source: Box<dyn FrameSource>,
        settings: CaptureSettings,
        clock: PTSClock,
        events: Sender<RigEvent>,
    ) -> Result<Self, RigError> {
        let format = SourceFormat {
            camera,
            device_id: settings.device_id.clone(),
            resolution: settings.resolution,
            fps: settings.target_fps,
        };

        log::info!(
            "Opening {} ({}) at {}@{}fps",
            camera,
            source.describe(),
            settings.resolution,
            settings.target_fps
        );
        source
            .open(&format)
            .map_err(|e| RigError::device(camera, format!("open failed: {}", e)))?;

        let queue = Arc::new(DropOldestQueue::new(settings.queue_capacity));
        let status = Arc::new(WorkerStatus::new());
        let stop_flag = Arc::new(AtomicBool::new(false));

        let acquisition = Acquisition {
            camera,
            source,
            queue: queue.clone(),
            status: status.clone(),
            stop_flag: stop_flag.clone(),
            clock,
            events,
            policy: settings.reconnect,
            next_sequence: 1,
            last_timestamp_us: None,
        };

        let handle = std::thread::Builder::new()
            .name(format!("swingcam-capture-{}", camera.label()))
            .spawn(move || acquisition.run())
            .map_err(|e| RigError::device(camera, format!("spawn failed: {}", e)))?;

        let worker = Self {
            camera,
            device_id: settings.device_id,
            queue,
            status,
            stop_flag,
            thread: Mutex::new(Some(handle)),
        };

        worker.await_first_frame(settings.startup_grace, settings.warmup_poll)?;
        Ok(worker)
    }

    fn await_first_frame(&self, grace: Duration, poll: Duration) -> Result<(), RigError> {
        let warmup_start = Instant::now();
        loop {
            if self.status.frames_captured.load(Ordering::Acquire) > 0 {
                log::info!(
                    "{} delivered first frame after {:?}",
                    self.camera,
                    warmup_start.elapsed()
                );
                return Ok(());
            }
            if self.status.state() == WorkerState::Failed {
                return Err(RigError::device(self.camera, "device failed during warm-up"));
            }
            if warmup_start.elapsed() >= grace {
                if let Err(e) = self.stop(Duration::from_millis(200)) {
                    log::warn!("Error stopping {} after warm-up timeout: {}", self.camera, e);
                }
                return Err(RigError::device(
                    self.camera,
                    format!("no frames within {:?}", grace),
                ));
            }
            std::thread::sleep(poll);
        }
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    /// Non-blocking read of the oldest queued frame
    pub fn next_frame(&self) -> Option<Frame> {
        self.queue.try_pop()
    }

    /// Shared handle to the output queue
    pub fn queue(&self) -> Arc<DropOldestQueue<Frame>> {
        self.queue.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.status.state()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), WorkerState::Running | WorkerState::Reconnecting)
    }

    pub fn status(&self) -> CameraStatus {
        let frames_captured = self.status.frames_captured.load(Ordering::Acquire);
        let (last_frame_timestamp_us, last_resolution) = if frames_captured > 0 {
            (
                Some(self.status.last_timestamp_us.load(Ordering::Acquire)),
                Some(Resolution::new(
                    self.status.last_width.load(Ordering::Acquire),
                    self.status.last_height.load(Ordering::Acquire),
                )),
            )
        } else {
            (None, None)
        };

        CameraStatus {
            camera: self.camera,
            device_id: self.device_id.clone(),
            state: self.state(),
            frames_captured,
            frames_dropped: self.queue.dropped(),
            reconnect_attempts: self.status.reconnect_attempts.load(Ordering::Acquire),
            last_frame_timestamp_us,
            last_resolution,
        }
    }

    /// Ask the acquisition thread to exit and wait up to `join_timeout`.
    ///
    /// A thread blocked inside the driver is left detached on timeout so a
    /// later call can retry the join.
    pub fn stop(&self, join_timeout: Duration) -> Result<(), RigError> {
        self.stop_flag.store(true, Ordering::Release);

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            let start = Instant::now();
            while !handle.is_finished() {
                if start.elapsed() >= join_timeout {
                    *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                    return Err(RigError::device(
                        self.camera,
                        "capture thread did not stop in time",
                    ));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.join().is_err() {
                log::error!("Capture thread for {} panicked", self.camera);
            }
        }
        Ok(())
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop(Duration::from_millis(100)) {
            log::warn!("Error stopping capture worker in drop: {}", e);
        }
    }
}

struct Acquisition {
    camera: CameraId,
    source: Box<dyn FrameSource>,
    queue: Arc<DropOldestQueue<Frame>>,
    status: Arc<WorkerStatus>,
    stop_flag: Arc<AtomicBool>,
    clock: PTSClock,
    events: Sender<RigEvent>,
    policy: ReconnectPolicy,
    next_sequence: u64,
    last_timestamp_us: Option<u64>,
}

impl Acquisition {
    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    fn run(mut self) {
        let mut failures = 0u32;
        let mut first_failure: Option<Instant> = None;

        while !self.stopped() {
            match self.source.read_frame() {
                Ok(raw) => {
                    if failures > 0 {
                        log::info!("{} recovered after {} failed reads", self.camera, failures);
                    }
                    failures = 0;
                    first_failure = None;
                    self.publish(raw);
                }
                Err(e) => {
                    if self.stopped() {
                        break;
                    }
                    failures += 1;
                    let since = *first_failure.get_or_insert_with(Instant::now);
                    let elapsed = since.elapsed();

                    if !self.policy.allows_retry(failures, elapsed) {
                        self.fail(format!(
                            "{} consecutive read failures in {:?}, last: {}",
                            failures, elapsed, e
                        ));
                        return;
                    }

                    self.status.set_state(WorkerState::Reconnecting);
                    self.status.reconnect_attempts.fetch_add(1, Ordering::AcqRel);
                    let delay = self.policy.delay_for(failures, elapsed);
                    log::warn!(
                        "{} read failed ({}), retry {}/{} in {:?}",
                        self.camera,
                        e,
                        failures,
                        self.policy.max_attempts,
                        delay
                    );

                    if !self.sleep_unless_stopped(delay) {
                        break;
                    }
                    if let Err(e) = self.source.reopen() {
                        log::warn!("{} reopen failed: {}", self.camera, e);
                    }
                }
            }
        }

        self.source.close();
        self.status.set_state(WorkerState::Stopped);
    }

    fn publish(&mut self, raw: RawFrame) {
        let now = self.clock.now_us();
        let timestamp_us = match self.last_timestamp_us {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_timestamp_us = Some(timestamp_us);

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.status.last_width.store(raw.width, Ordering::Release);
        self.status.last_height.store(raw.height, Ordering::Release);
        self.status
            .last_timestamp_us
            .store(timestamp_us, Ordering::Release);

        self.queue.push(Frame {
            camera: self.camera,
            sequence,
            timestamp_us,
            width: raw.width,
            height: raw.height,
            pixels: raw.pixels,
        });

        if self.status.state() != WorkerState::Running {
            self.status.set_state(WorkerState::Running);
        }
        self.status.frames_captured.fetch_add(1, Ordering::AcqRel);
    }

    fn fail(&mut self, reason: String) {
        log::error!("{} lost: {}", self.camera, reason);
        self.source.close();
        self.status.set_state(WorkerState::Failed);
        let _ = self.events.send(RigEvent::DeviceLost {
            camera: self.camera,
            reason,
        });
    }

    fn sleep_unless_stopped(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }
}
