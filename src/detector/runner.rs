//! Detector thread: pulls subsampled frames, runs the signal extractor and
//! the state machine, and reports commands to the supervisor.

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::signal::SignalExtractor;
use super::{DetectorState, DetectorThresholds, MotionDetector, MotionSample, Transition};
use crate::errors::RigError;
use crate::events::RigEvent;
use crate::timing::PTSClock;
use crate::types::Frame;

const COOLDOWN_POLL: Duration = Duration::from_millis(50);
const FRAME_BACKLOG: usize = 2;

/// Messages accepted by the detector thread besides frames
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorControl {
    SetThresholds(DetectorThresholds),
    Reset,
    Shutdown,
}

/// Snapshot published after every processed sample or transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorStatus {
    pub state: DetectorState,
    pub latest_signal: Option<f64>,
    pub samples_processed: u64,
    pub frames_skipped: u64,
    pub thresholds: DetectorThresholds,
}

impl DetectorStatus {
    fn from_detector(detector: &MotionDetector, frames_skipped: u64) -> Self {
        Self {
            state: detector.state(),
            latest_signal: detector.last_signal(),
            samples_processed: detector.samples_processed(),
            frames_skipped,
            thresholds: *detector.thresholds(),
        }
    }
}

/// Owner side of the detector thread
pub struct DetectorHandle {
    frames: Sender<Frame>,
    control: Sender<DetectorControl>,
    status: Arc<Mutex<DetectorStatus>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DetectorHandle {
    pub fn spawn<E>(
        detector: MotionDetector,
        extractor: E,
        clock: PTSClock,
        events: Sender<RigEvent>,
    ) -> Result<Self, RigError>
    where
        E: SignalExtractor + 'static,
    {
        let (frame_tx, frame_rx) = bounded(FRAME_BACKLOG);
        let (control_tx, control_rx) = bounded(16);
        let status = Arc::new(Mutex::new(DetectorStatus::from_detector(&detector, 0)));

        let worker = DetectorLoop {
            detector,
            extractor,
            clock,
            events,
            status: Arc::clone(&status),
            skipped: 0,
        };

        let handle = thread::Builder::new()
            .name("swingcam-detector".to_string())
            .spawn(move || worker.run(frame_rx, control_rx))
            .map_err(|e| RigError::IoError(format!("Failed to spawn detector thread: {}", e)))?;

        Ok(Self {
            frames: frame_tx,
            control: control_tx,
            status,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Hand a frame to the detector without blocking. Returns false when the
    /// detector is still busy with earlier frames and this one was skipped.
    pub fn offer(&self, frame: Frame) -> bool {
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Validated here so the caller sees `InvalidConfig` synchronously
    pub fn set_thresholds(&self, thresholds: DetectorThresholds) -> Result<(), RigError> {
        thresholds.validate()?;
        self.control
            .send(DetectorControl::SetThresholds(thresholds))
            .map_err(|_| RigError::invalid("Detector thread is not running"))
    }

    pub fn reset(&self) {
        let _ = self.control.send(DetectorControl::Reset);
    }

    pub fn status(&self) -> DetectorStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn shutdown(&self, join_timeout: Duration) {
        let _ = self.control.send(DetectorControl::Shutdown);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Detector thread did not stop within {:?}", join_timeout);
            }
        }
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(100));
    }
}

struct DetectorLoop<E> {
    detector: MotionDetector,
    extractor: E,
    clock: PTSClock,
    events: Sender<RigEvent>,
    status: Arc<Mutex<DetectorStatus>>,
    skipped: u64,
}

impl<E: SignalExtractor> DetectorLoop<E> {
    fn run(mut self, frames: Receiver<Frame>, control: Receiver<DetectorControl>) {
        info!("Motion detector started ({:?})", self.detector.thresholds());
        let ticker = tick(COOLDOWN_POLL);

        loop {
            select! {
                recv(frames) -> msg => match msg {
                    Ok(frame) => self.handle_frame(&frame),
                    Err(_) => break,
                },
                recv(control) -> msg => match msg {
                    Ok(DetectorControl::SetThresholds(t)) => {
                        if let Err(e) = self.detector.set_thresholds(t) {
                            warn!("Rejected detector thresholds: {}", e);
                        }
                    }
                    Ok(DetectorControl::Reset) => {
                        self.detector.reset();
                        self.extractor.on_idle();
                    }
                    Ok(DetectorControl::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => {
                    if let Some(t) = self.detector.poll(self.clock.elapsed()) {
                        self.apply(t);
                    }
                }
            }
            self.publish();
        }
        info!("Motion detector stopped");
    }

    fn handle_frame(&mut self, frame: &Frame) {
        let signal = match self.extractor.extract_signal(frame) {
            Some(s) => s,
            None => {
                // No reading yet and nothing to hold
                self.skipped += 1;
                return;
            }
        };
        let sample = MotionSample::new(Duration::from_micros(frame.timestamp_us), signal);
        for transition in self.detector.process(sample) {
            self.apply(transition);
        }
    }

    fn apply(&mut self, transition: Transition) {
        info!(
            "Detector {:?} -> {:?}",
            transition.from, transition.to
        );
        if transition.from == DetectorState::Cooldown && transition.to == DetectorState::Idle {
            self.extractor.on_idle();
        }
        if let Some(command) = transition.command {
            debug!("Detector command {:?}", command);
            if self.events.send(RigEvent::Detector(command)).is_err() {
                warn!("Supervisor gone, dropping detector command {:?}", command);
            }
        }
    }

    fn publish(&self) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) =
            DetectorStatus::from_detector(&self.detector, self.skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectorCommand, HoldLastValue};
    use crate::testing::{solid_frame, ScriptedSignal};
    use crate::types::CameraId;
    use crossbeam_channel::unbounded;

    fn thresholds() -> DetectorThresholds {
        DetectorThresholds {
            motion_threshold: 20.0,
            release_threshold: 5.0,
            confirmation_frames: 2,
            release_confirmation_frames: 2,
            cooldown: Duration::from_millis(200),
        }
    }

    fn frame_at(seq: u64, ts_us: u64) -> Frame {
        let mut f = solid_frame(CameraId::Primary, seq, 2, 2, 0);
        f.timestamp_us = ts_us;
        f
    }

    /// Offer frames one at a time so none are skipped for backlog
    fn offer_all(handle: &DetectorHandle, frames: Vec<Frame>) {
        for frame in frames {
            let mut frame = Some(frame);
            let deadline = Instant::now() + Duration::from_secs(2);
            while let Some(f) = frame.take() {
                if !handle.offer(f.clone()) {
                    assert!(Instant::now() < deadline, "detector stalled");
                    thread::sleep(Duration::from_millis(1));
                    frame = Some(f);
                }
            }
        }
    }

    #[test]
    fn test_commands_reach_event_channel() {
        let (tx, rx) = unbounded();
        let signals = vec![Some(30.0), Some(30.0), Some(1.0), Some(1.0)];
        let handle = DetectorHandle::spawn(
            MotionDetector::new(thresholds()).expect("detector"),
            HoldLastValue::new(ScriptedSignal::new(signals)),
            PTSClock::new(),
            tx,
        )
        .expect("spawn");

        offer_all(
            &handle,
            (1..=4).map(|i| frame_at(i, i * 66_000)).collect(),
        );

        let first = rx.recv_timeout(Duration::from_secs(2)).expect("start");
        assert_eq!(first, RigEvent::Detector(DetectorCommand::StartRecording));
        let second = rx.recv_timeout(Duration::from_secs(2)).expect("stop");
        assert_eq!(
            second,
            RigEvent::Detector(DetectorCommand::StopRecording {
                grace: Duration::from_millis(200)
            })
        );
        handle.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_thresholds_rejected_synchronously() {
        let (tx, _rx) = unbounded();
        let handle = DetectorHandle::spawn(
            MotionDetector::new(thresholds()).expect("detector"),
            ScriptedSignal::new(Vec::new()),
            PTSClock::new(),
            tx,
        )
        .expect("spawn");

        let bad = DetectorThresholds {
            confirmation_frames: 0,
            ..thresholds()
        };
        assert!(matches!(
            handle.set_thresholds(bad),
            Err(RigError::InvalidConfig(_))
        ));
        assert_eq!(handle.status().thresholds, thresholds());
    }
}
