//! The assembled capture rig
//!
//! Two capture workers feed a synchronizer thread. Every pair goes to the
//! recording sink (discarded when no session is open) and every Nth
//! camera-of-interest frame goes to the motion detector. A supervisor thread
//! turns worker, sink and detector events into controller actions.

use crossbeam_channel::{unbounded, Sender};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

use crate::capture::{CameraStatus, CaptureWorker, FrameSource};
use crate::config::RigConfig;
use crate::controller::{
    spawn_supervisor, AnalysisHandoff, ControllerStatus, LoggingHandoff, SessionController,
};
use crate::detector::{
    BaselineDelta, DetectorHandle, DetectorStatus, DetectorThresholds, FrameDifferenceSignal,
    HoldLastValue, MotionDetector, SignalExtractor, Subsampler,
};
use crate::errors::RigError;
use crate::events::RigEvent;
use crate::recording::{DefaultWriterFactory, RecordingSession, RecordingSink, WriterFactory};
use crate::sync::{FrameSynchronizer, SyncStats};
use crate::testing::SyntheticSource;
use crate::timing::PTSClock;
use crate::types::{CameraId, VideoParams};

const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything an external control surface can observe
#[derive(Debug, Clone, Serialize)]
pub struct RigStatus {
    pub controller: ControllerStatus,
    pub detector: DetectorStatus,
    pub cameras: Vec<CameraStatus>,
    pub sync: SyncStats,
    pub sync_tolerance_us: u64,
    pub detector_subsample: u32,
}

/// Assembles a [`DualCameraRig`]
pub struct RigBuilder {
    config: RigConfig,
    sources: [Option<Box<dyn FrameSource>>; 2],
    extractor: Option<Box<dyn SignalExtractor>>,
    writer_factory: Option<Arc<dyn WriterFactory>>,
    handoff: Option<Arc<dyn AnalysisHandoff>>,
}

impl RigBuilder {
    pub fn new(config: RigConfig) -> Self {
        Self {
            config,
            sources: [None, None],
            extractor: None,
            writer_factory: None,
            handoff: None,
        }
    }

    pub fn source(mut self, camera: CameraId, source: Box<dyn FrameSource>) -> Self {
        self.sources[camera.index()] = Some(source);
        self
    }

    /// Synthetic cameras at the configured resolution and rate, with a
    /// burst of motion every `motion_period`
    pub fn synthetic(mut self, motion_period: Option<Duration>) -> Self {
        let res = self.config.resolution();
        let fps = self.config.cameras.fps;
        for camera in CameraId::ALL {
            let mut source = SyntheticSource::new(res.width, res.height, fps);
            if let Some(period) = motion_period {
                source = source.with_motion_bursts(period, period / 4);
            }
            self.sources[camera.index()] = Some(Box::new(source));
        }
        self
    }

    /// Replace the default frame-difference signal (e.g. with a pose model)
    pub fn extractor(mut self, extractor: Box<dyn SignalExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn writer_factory(mut self, factory: Arc<dyn WriterFactory>) -> Self {
        self.writer_factory = Some(factory);
        self
    }

    pub fn handoff(mut self, handoff: Arc<dyn AnalysisHandoff>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn build(self) -> Result<DualCameraRig, RigError> {
        let RigBuilder {
            config,
            sources,
            extractor,
            writer_factory,
            handoff,
        } = self;
        config.validate()?;

        let clock = PTSClock::new();
        let (events_tx, events_rx) = unbounded();

        let [primary_source, secondary_source] = sources;
        let primary = Arc::new(CaptureWorker::start(
            CameraId::Primary,
            resolve_source(&config, CameraId::Primary, primary_source)?,
            config.capture_settings(CameraId::Primary),
            clock.clone(),
            events_tx.clone(),
        )?);
        let secondary = Arc::new(CaptureWorker::start(
            CameraId::Secondary,
            resolve_source(&config, CameraId::Secondary, secondary_source)?,
            config.capture_settings(CameraId::Secondary),
            clock.clone(),
            events_tx.clone(),
        )?);

        let factory = writer_factory.unwrap_or_else(|| {
            Arc::new(DefaultWriterFactory {
                jpeg_quality: config.recording.jpeg_quality,
                bitrate: config.recording.bitrate,
                title: Some(crate::NAME.to_string()),
            }) as Arc<dyn WriterFactory>
        });
        let sink_settings = config.sink_settings();
        let container_fps = sink_settings.fps;
        let sink = Arc::new(RecordingSink::new(sink_settings, factory, events_tx.clone()));

        let extractor = extractor
            .unwrap_or_else(|| Box::new(FrameDifferenceSignal::default()) as Box<dyn SignalExtractor>);
        let extractor: Box<dyn SignalExtractor> = if config.detector.use_baseline {
            Box::new(BaselineDelta::new(extractor))
        } else {
            extractor
        };
        let detector = Arc::new(DetectorHandle::spawn(
            MotionDetector::new(config.thresholds())?,
            HoldLastValue::new(extractor),
            clock.clone(),
            events_tx.clone(),
        )?);

        let fallback = config.resolution();
        let workers_for_params = [Arc::clone(&primary), Arc::clone(&secondary)];
        let params = move || {
            let of = |worker: &CaptureWorker| VideoParams {
                resolution: worker.status().last_resolution.unwrap_or(fallback),
                fps: container_fps,
            };
            [of(&workers_for_params[0]), of(&workers_for_params[1])]
        };

        let controller = Arc::new(
            SessionController::new(Arc::clone(&sink), config.thresholds(), Box::new(params))
                .with_detector(Arc::clone(&detector))
                .with_handoff(
                    handoff.unwrap_or_else(|| Arc::new(LoggingHandoff) as Arc<dyn AnalysisHandoff>),
                ),
        );
        if config.detector.auto_mode {
            controller.set_auto_mode(true)?;
        }
        let supervisor = spawn_supervisor(Arc::clone(&controller), events_rx)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let sync_stats = Arc::new(Mutex::new(SyncStats::default()));
        let sync_loop = SyncLoop {
            synchronizer: FrameSynchronizer::new(config.tolerance_us()),
            primary: Arc::clone(&primary),
            secondary: Arc::clone(&secondary),
            sink: Arc::clone(&sink),
            detector: Arc::clone(&detector),
            camera_of_interest: config.detector.camera_of_interest,
            subsampler: Subsampler::new(config.subsample_factor()),
            tick: Duration::from_millis(config.sync.tick_ms.max(1)),
            stats: Arc::clone(&sync_stats),
            stop_flag: Arc::clone(&stop_flag),
        };
        let sync_thread = thread::Builder::new()
            .name("swingcam-sync".to_string())
            .spawn(move || sync_loop.run())
            .map_err(|e| RigError::IoError(format!("Failed to spawn sync thread: {}", e)))?;

        info!(
            "Rig running: tolerance {}us, detector every {} pairs on {}",
            config.tolerance_us(),
            config.subsample_factor(),
            config.detector.camera_of_interest
        );

        Ok(DualCameraRig {
            config,
            workers: [primary, secondary],
            sink,
            detector,
            controller,
            sync_stats,
            stop_flag,
            sync_thread: Mutex::new(Some(sync_thread)),
            supervisor: Mutex::new(Some(supervisor)),
            events: events_tx,
        })
    }
}

#[cfg(feature = "camera")]
fn resolve_source(
    config: &RigConfig,
    camera: CameraId,
    source: Option<Box<dyn FrameSource>>,
) -> Result<Box<dyn FrameSource>, RigError> {
    match source {
        Some(s) => Ok(s),
        None => Ok(Box::new(crate::platform::NokhwaSource::new(
            config.device_id(camera),
        )?)),
    }
}

#[cfg(not(feature = "camera"))]
fn resolve_source(
    _config: &RigConfig,
    camera: CameraId,
    source: Option<Box<dyn FrameSource>>,
) -> Result<Box<dyn FrameSource>, RigError> {
    source.ok_or_else(|| {
        RigError::invalid(format!(
            "No frame source for {} (build with the `camera` feature or use synthetic sources)",
            camera
        ))
    })
}

struct SyncLoop {
    synchronizer: FrameSynchronizer,
    primary: Arc<CaptureWorker>,
    secondary: Arc<CaptureWorker>,
    sink: Arc<RecordingSink>,
    detector: Arc<DetectorHandle>,
    camera_of_interest: CameraId,
    subsampler: Subsampler,
    tick: Duration,
    stats: Arc<Mutex<SyncStats>>,
    stop_flag: Arc<AtomicBool>,
}

impl SyncLoop {
    fn run(mut self) {
        let queue_a = self.primary.queue();
        let queue_b = self.secondary.queue();
        let mut skipped_by_detector = 0u64;

        while !self.stop_flag.load(Ordering::Acquire) {
            while let Some(pair) = self.synchronizer.tick(&queue_a, &queue_b) {
                if self.subsampler.accept()
                    && !self.detector.offer(pair.frame(self.camera_of_interest).clone())
                {
                    skipped_by_detector += 1;
                }
                self.sink.submit(pair);
            }

            *self.stats.lock().unwrap_or_else(PoisonError::into_inner) =
                self.synchronizer.stats().clone();
            thread::sleep(self.tick);
        }
        debug!(
            "Sync loop exiting, {} samples skipped while detector was busy",
            skipped_by_detector
        );
    }
}

/// A running two-camera rig
pub struct DualCameraRig {
    config: RigConfig,
    workers: [Arc<CaptureWorker>; 2],
    sink: Arc<RecordingSink>,
    detector: Arc<DetectorHandle>,
    controller: Arc<SessionController>,
    sync_stats: Arc<Mutex<SyncStats>>,
    stop_flag: Arc<AtomicBool>,
    sync_thread: Mutex<Option<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    events: Sender<RigEvent>,
}

impl DualCameraRig {
    pub fn builder(config: RigConfig) -> RigBuilder {
        RigBuilder::new(config)
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn worker(&self, camera: CameraId) -> &CaptureWorker {
        &self.workers[camera.index()]
    }

    pub fn is_recording(&self) -> bool {
        self.sink.is_recording()
    }

    pub fn start_session(&self) -> Result<Uuid, RigError> {
        self.controller.start_session()
    }

    pub fn stop_session(&self) -> Result<RecordingSession, RigError> {
        self.controller.stop_session()
    }

    pub fn set_auto_mode(&self, enabled: bool) -> Result<(), RigError> {
        self.controller.set_auto_mode(enabled)
    }

    pub fn set_thresholds(&self, thresholds: DetectorThresholds) -> Result<(), RigError> {
        self.controller.set_thresholds(thresholds)
    }

    pub fn status(&self) -> RigStatus {
        RigStatus {
            controller: self.controller.status(),
            detector: self.detector.status(),
            cameras: self.workers.iter().map(|w| w.status()).collect(),
            sync: self
                .sync_stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            sync_tolerance_us: self.config.tolerance_us(),
            detector_subsample: self.config.subsample_factor(),
        }
    }

    /// Stop synchronizing, close any open session, then stop the detector
    /// and both cameras. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stop_flag.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down rig");

        let sync = self
            .sync_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sync {
            if handle.join().is_err() {
                warn!("Sync thread panicked");
            }
        }

        self.controller.shutdown();

        let _ = self.events.send(RigEvent::Shutdown);
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = supervisor {
            if handle.join().is_err() {
                warn!("Supervisor thread panicked");
            }
        }

        self.detector.shutdown(WORKER_JOIN_TIMEOUT);
        for worker in &self.workers {
            if let Err(e) = worker.stop(WORKER_JOIN_TIMEOUT) {
                warn!("{}", e);
            }
        }
    }
}

impl Drop for DualCameraRig {
    fn drop(&mut self) {
        self.shutdown();
    }
}
