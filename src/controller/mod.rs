//! Session controller
//!
//! The single authority over recording sessions. Manual commands and
//! detector commands both end up here; all state lives behind one mutex so
//! at most one session can ever be active.

mod handoff;

pub use handoff::{AnalysisHandoff, CollectingHandoff, LoggingHandoff};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::detector::{DetectorCommand, DetectorHandle, DetectorThresholds};
use crate::errors::RigError;
use crate::events::RigEvent;
use crate::recording::{ActiveRecording, RecordingSession, RecordingSink, SessionTrigger};
use crate::types::VideoParams;

const SUPERVISOR_IDLE_WAIT: Duration = Duration::from_millis(100);

/// Supplies primary and secondary stream parameters when a session opens
pub type ParamsProvider = dyn Fn() -> [VideoParams; 2] + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStop {
    None,
    At(Instant),
    /// Motion resumed during cooldown; the stop waits for the detector
    Held,
}

struct ControllerState {
    auto_mode: bool,
    active: Option<(RecordingSession, ActiveRecording)>,
    pending_stop: PendingStop,
    last_session: Option<RecordingSession>,
    thresholds: DetectorThresholds,
}

/// Live view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: RecordingSession,
    pub elapsed_ms: u64,
}

impl SessionSummary {
    fn of(session: &RecordingSession) -> Self {
        Self {
            session: session.clone(),
            elapsed_ms: session.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub auto_mode: bool,
    pub active_session: Option<SessionSummary>,
    pub last_session: Option<SessionSummary>,
    /// Milliseconds until a scheduled stop, if one is pending
    pub stop_in_ms: Option<u64>,
    pub stop_held: bool,
    pub thresholds: DetectorThresholds,
}

pub struct SessionController {
    state: Mutex<ControllerState>,
    sink: Arc<RecordingSink>,
    detector: Option<Arc<DetectorHandle>>,
    handoff: Arc<dyn AnalysisHandoff>,
    params: Box<ParamsProvider>,
}

impl SessionController {
    pub fn new(
        sink: Arc<RecordingSink>,
        thresholds: DetectorThresholds,
        params: Box<ParamsProvider>,
    ) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                auto_mode: false,
                active: None,
                pending_stop: PendingStop::None,
                last_session: None,
                thresholds,
            }),
            sink,
            detector: None,
            handoff: Arc::new(LoggingHandoff),
            params,
        }
    }

    pub fn with_detector(mut self, detector: Arc<DetectorHandle>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_handoff(mut self, handoff: Arc<dyn AnalysisHandoff>) -> Self {
        self.handoff = handoff;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_recording(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn auto_mode(&self) -> bool {
        self.lock().auto_mode
    }

    /// Manual start
    pub fn start_session(&self) -> Result<Uuid, RigError> {
        let mut state = self.lock();
        if state.auto_mode {
            return Err(RigError::AutoModeActive);
        }
        self.begin(&mut state, SessionTrigger::Manual)
    }

    /// Manual stop. Returns the finished session record.
    pub fn stop_session(&self) -> Result<RecordingSession, RigError> {
        let mut state = self.lock();
        if state.auto_mode {
            return Err(RigError::AutoModeActive);
        }
        self.finish(&mut state, None)
    }

    /// Enabling fails with `AlreadyActive` while a manual session runs;
    /// disabling stops any motion-started session first.
    pub fn set_auto_mode(&self, enabled: bool) -> Result<(), RigError> {
        let mut state = self.lock();
        if state.auto_mode == enabled {
            return Ok(());
        }

        if enabled {
            if state.active.is_some() {
                return Err(RigError::AlreadyActive);
            }
        } else if state.active.is_some() {
            self.finish(&mut state, None)?;
        }

        state.auto_mode = enabled;
        state.pending_stop = PendingStop::None;
        if let Some(detector) = &self.detector {
            detector.reset();
        }
        info!("Automatic mode {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn set_thresholds(&self, thresholds: DetectorThresholds) -> Result<(), RigError> {
        thresholds.validate()?;
        if let Some(detector) = &self.detector {
            detector.set_thresholds(thresholds)?;
        }
        self.lock().thresholds = thresholds;
        Ok(())
    }

    /// Apply one supervisor event
    pub fn handle(&self, event: RigEvent) {
        let mut state = self.lock();
        match event {
            RigEvent::DeviceLost { camera, reason } => {
                error!("Camera {} lost: {}", camera, reason);
                if state.active.is_some() {
                    let reason = format!("{}", RigError::device(camera, reason));
                    let _ = self.finish(&mut state, Some(reason));
                }
            }
            RigEvent::SessionFailed { session_id, error } => {
                let matches = state
                    .active
                    .as_ref()
                    .map_or(false, |(s, _)| s.id == session_id);
                if matches {
                    let _ = self.finish(&mut state, Some(error.to_string()));
                } else {
                    debug!("Ignoring failure of finished session {}", session_id);
                }
            }
            RigEvent::Detector(command) => self.apply_command(&mut state, command),
            RigEvent::Shutdown => {
                if state.active.is_some() {
                    let _ = self.finish(&mut state, None);
                }
            }
        }
    }

    fn apply_command(&self, state: &mut ControllerState, command: DetectorCommand) {
        if !state.auto_mode {
            debug!("Manual mode, ignoring detector command {:?}", command);
            return;
        }
        match command {
            DetectorCommand::StartRecording => {
                if state.active.is_some() {
                    // Re-trigger during cooldown continues the same session
                    if state.pending_stop != PendingStop::None {
                        info!("Motion resumed, continuing current session");
                    }
                    state.pending_stop = PendingStop::None;
                } else if let Err(e) = self.begin(state, SessionTrigger::Motion) {
                    error!("Motion-triggered session failed to start: {}", e);
                }
            }
            DetectorCommand::StopRecording { grace } => {
                if state.active.is_none() {
                    return;
                }
                if grace.is_zero() {
                    let _ = self.finish(state, None);
                } else {
                    debug!("Session stop scheduled in {:?}", grace);
                    state.pending_stop = PendingStop::At(Instant::now() + grace);
                }
            }
            DetectorCommand::HoldStop => {
                if state.active.is_some() && state.pending_stop != PendingStop::None {
                    state.pending_stop = PendingStop::Held;
                }
            }
        }
    }

    /// Stop the session if its scheduled stop time has passed
    pub fn check_deadlines(&self, now: Instant) {
        let mut state = self.lock();
        if let PendingStop::At(deadline) = state.pending_stop {
            if now >= deadline && state.active.is_some() {
                let _ = self.finish(&mut state, None);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.lock().pending_stop {
            PendingStop::At(deadline) => Some(deadline),
            _ => None,
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.lock();
        let active_session = state.active.as_ref().map(|(session, rec)| {
            let mut live = SessionSummary::of(session);
            live.session.frames_written = rec.frames_written();
            live.session.dropped_pairs = rec.dropped();
            live
        });
        let now = Instant::now();
        ControllerStatus {
            auto_mode: state.auto_mode,
            active_session,
            last_session: state.last_session.as_ref().map(SessionSummary::of),
            stop_in_ms: match state.pending_stop {
                PendingStop::At(d) => Some(d.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
            stop_held: state.pending_stop == PendingStop::Held,
            thresholds: state.thresholds,
        }
    }

    pub fn last_session(&self) -> Option<RecordingSession> {
        self.lock().last_session.clone()
    }

    /// Close any open session; used on rig shutdown
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if state.active.is_some() {
            let _ = self.finish(&mut state, None);
        }
    }

    fn begin(&self, state: &mut ControllerState, trigger: SessionTrigger) -> Result<Uuid, RigError> {
        if state.active.is_some() {
            return Err(RigError::AlreadyActive);
        }

        let mut session = RecordingSession::new(trigger);
        match self.sink.open(&session, (self.params)()) {
            Ok(recording) => {
                session.codec = Some(recording.codec());
                session.files = recording.files().to_vec();
                let id = session.id;
                info!("Session {} started ({:?})", id, trigger);
                state.active = Some((session, recording));
                state.pending_stop = PendingStop::None;
                Ok(id)
            }
            Err(e) => {
                session.mark_stopped(Some(e.to_string()));
                state.last_session = Some(session);
                Err(e)
            }
        }
    }

    fn finish(
        &self,
        state: &mut ControllerState,
        reason: Option<String>,
    ) -> Result<RecordingSession, RigError> {
        let (mut session, recording) = state.active.take().ok_or(RigError::NoActiveSession)?;
        state.pending_stop = PendingStop::None;

        let outcome = self.sink.close(recording);
        session.frames_written = outcome.frames_written;
        session.dropped_pairs = outcome.dropped;
        let failure = reason.or_else(|| outcome.error.as_ref().map(|e| e.to_string()));
        let complete = failure.is_none();
        session.mark_stopped(failure);

        if let Err(e) = self.sink.write_metadata(&outcome, &session) {
            warn!("Session {} metadata not written: {}", session.id, e);
        }

        if complete {
            info!(
                "Session {} stopped after {:?} ({} pairs)",
                session.id,
                session.elapsed(),
                session.frames_written
            );
            self.handoff.session_complete(&session, &outcome.files);
        } else {
            error!(
                "Session {} ended with error: {}",
                session.id,
                session.error.as_deref().unwrap_or("unknown")
            );
        }

        state.last_session = Some(session.clone());
        Ok(session)
    }
}

/// Feed rig events into the controller until `Shutdown` or disconnect,
/// firing scheduled stops in between
pub fn spawn_supervisor(
    controller: Arc<SessionController>,
    events: Receiver<RigEvent>,
) -> Result<JoinHandle<()>, RigError> {
    thread::Builder::new()
        .name("swingcam-supervisor".to_string())
        .spawn(move || loop {
            let wait = controller
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(SUPERVISOR_IDLE_WAIT)
                .min(SUPERVISOR_IDLE_WAIT);

            match events.recv_timeout(wait) {
                Ok(RigEvent::Shutdown) => {
                    controller.handle(RigEvent::Shutdown);
                    break;
                }
                Ok(event) => controller.handle(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            controller.check_deadlines(Instant::now());
        })
        .map_err(|e| RigError::IoError(format!("Failed to spawn supervisor thread: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Codec, DefaultWriterFactory, SessionState, SinkSettings};
    use crossbeam_channel::unbounded;
    use std::path::Path;

    fn controller(dir: &Path) -> SessionController {
        let (tx, _rx) = unbounded();
        let sink = RecordingSink::new(
            SinkSettings {
                output_directory: dir.to_path_buf(),
                codecs: vec![Codec::RawRgb],
                ..SinkSettings::default()
            },
            Arc::new(DefaultWriterFactory::default()),
            tx,
        );
        SessionController::new(
            Arc::new(sink),
            DetectorThresholds::default(),
            Box::new(|| [VideoParams::new(4, 4, 30.0); 2]),
        )
    }

    #[test]
    fn test_start_twice_is_already_active() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.start_session().expect("start");
        assert_eq!(c.start_session(), Err(RigError::AlreadyActive));
        let session = c.stop_session().expect("stop");
        assert_eq!(session.state, SessionState::Stopped);
        assert_eq!(c.stop_session().unwrap_err(), RigError::NoActiveSession);
    }

    #[test]
    fn test_manual_commands_rejected_in_auto_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.set_auto_mode(true).expect("auto");
        assert_eq!(c.start_session(), Err(RigError::AutoModeActive));
        assert_eq!(c.stop_session().unwrap_err(), RigError::AutoModeActive);
    }

    #[test]
    fn test_enable_auto_mode_during_manual_session_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.start_session().expect("start");
        assert_eq!(c.set_auto_mode(true), Err(RigError::AlreadyActive));
        assert!(!c.auto_mode());
    }

    #[test]
    fn test_detector_commands_ignored_in_manual_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.handle(RigEvent::Detector(DetectorCommand::StartRecording));
        assert!(!c.is_recording());
    }

    #[test]
    fn test_cooldown_retrigger_continues_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.set_auto_mode(true).expect("auto");

        c.handle(RigEvent::Detector(DetectorCommand::StartRecording));
        let first = c.status().active_session.expect("active").session.id;

        c.handle(RigEvent::Detector(DetectorCommand::StopRecording {
            grace: Duration::from_secs(60),
        }));
        assert!(c.status().stop_in_ms.is_some());
        c.handle(RigEvent::Detector(DetectorCommand::HoldStop));
        assert!(c.status().stop_held);
        c.handle(RigEvent::Detector(DetectorCommand::StartRecording));

        let status = c.status();
        assert_eq!(status.active_session.expect("active").session.id, first);
        assert!(!status.stop_held);
        assert!(status.stop_in_ms.is_none());
    }

    #[test]
    fn test_scheduled_stop_fires_at_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.set_auto_mode(true).expect("auto");
        c.handle(RigEvent::Detector(DetectorCommand::StartRecording));
        c.handle(RigEvent::Detector(DetectorCommand::StopRecording {
            grace: Duration::from_millis(10),
        }));

        c.check_deadlines(Instant::now());
        assert!(c.is_recording());
        c.check_deadlines(Instant::now() + Duration::from_millis(20));
        assert!(!c.is_recording());
        assert!(c.last_session().expect("last").error.is_none());
    }

    #[test]
    fn test_disabling_auto_mode_stops_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.set_auto_mode(true).expect("auto");
        c.handle(RigEvent::Detector(DetectorCommand::StartRecording));
        assert!(c.is_recording());

        c.set_auto_mode(false).expect("manual");
        assert!(!c.is_recording());
        assert_eq!(
            c.last_session().expect("last").trigger,
            SessionTrigger::Motion
        );
    }

    #[test]
    fn test_device_lost_stops_with_reason() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        c.start_session().expect("start");
        c.handle(RigEvent::DeviceLost {
            camera: crate::types::CameraId::Secondary,
            reason: "unplugged".into(),
        });
        let last = c.last_session().expect("last");
        assert_eq!(last.state, SessionState::Stopped);
        assert!(last.error.expect("error").contains("unplugged"));
    }

    #[test]
    fn test_invalid_thresholds_leave_state_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = controller(dir.path());
        let bad = DetectorThresholds {
            motion_threshold: f64::NAN,
            ..DetectorThresholds::default()
        };
        assert!(matches!(c.set_thresholds(bad), Err(RigError::InvalidConfig(_))));
        assert_eq!(c.status().thresholds, DetectorThresholds::default());
    }
}
