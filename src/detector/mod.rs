//! Motion-triggered recording control.
//!
//! [`MotionDetector`] is a pure four-state machine over scalar motion
//! samples. [`signal`] turns frames into those samples and [`runner`] drives
//! the machine on its own thread.

pub mod runner;
pub mod signal;

pub use runner::{DetectorControl, DetectorHandle, DetectorStatus};
pub use signal::{
    shoulder_turn_degrees, BaselineDelta, FrameDifferenceSignal, HoldLastValue, Landmark,
    PoseEstimator, ShoulderLandmarks, ShoulderTurnSignal, SignalExtractor,
};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::RigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Idle,
    MotionDetected,
    Recording,
    Cooldown,
}

impl DetectorState {
    pub const ALL: [DetectorState; 4] = [
        DetectorState::Idle,
        DetectorState::MotionDetected,
        DetectorState::Recording,
        DetectorState::Cooldown,
    ];
}

/// Tunable thresholds, applied between samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorThresholds {
    pub motion_threshold: f64,
    /// Must not exceed `motion_threshold`
    pub release_threshold: f64,
    pub confirmation_frames: u32,
    pub release_confirmation_frames: u32,
    pub cooldown: Duration,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            motion_threshold: 15.0,
            release_threshold: 5.0,
            confirmation_frames: 5,
            release_confirmation_frames: 3,
            cooldown: Duration::from_secs(2),
        }
    }
}

impl DetectorThresholds {
    pub fn validate(&self) -> Result<(), RigError> {
        if !self.motion_threshold.is_finite() || !self.release_threshold.is_finite() {
            return Err(RigError::invalid("Detector thresholds must be finite"));
        }
        if self.release_threshold > self.motion_threshold {
            return Err(RigError::invalid(format!(
                "release_threshold {} exceeds motion_threshold {}",
                self.release_threshold, self.motion_threshold
            )));
        }
        if self.confirmation_frames == 0 || self.release_confirmation_frames == 0 {
            return Err(RigError::invalid("Confirmation frame counts must be at least 1"));
        }
        if self.cooldown.is_zero() {
            return Err(RigError::invalid("Cooldown duration must be positive"));
        }
        Ok(())
    }
}

/// One processed signal value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Capture time on the rig clock
    pub timestamp: Duration,
    pub signal: f64,
}

impl MotionSample {
    pub fn new(timestamp: Duration, signal: f64) -> Self {
        Self { timestamp, signal }
    }
}

/// Request issued to the session controller on a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorCommand {
    /// Entered `Recording`
    StartRecording,
    /// Stop once `grace` has passed unless a `HoldStop` arrives first
    StopRecording { grace: Duration },
    /// Motion resumed during cooldown; keep the current session open
    HoldStop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: DetectorState,
    pub to: DetectorState,
    pub at: Duration,
    pub command: Option<DetectorCommand>,
}

/// Four-state debounce machine: Idle, MotionDetected, Recording, Cooldown
#[derive(Debug, Clone)]
pub struct MotionDetector {
    thresholds: DetectorThresholds,
    state: DetectorState,
    above: u32,
    below: u32,
    cooldown_since: Option<Duration>,
    /// MotionDetected was entered from Cooldown
    continuing: bool,
    last_signal: Option<f64>,
    samples: u64,
}

impl MotionDetector {
    pub fn new(thresholds: DetectorThresholds) -> Result<Self, RigError> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            state: DetectorState::Idle,
            above: 0,
            below: 0,
            cooldown_since: None,
            continuing: false,
            last_signal: None,
            samples: 0,
        })
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }

    pub fn last_signal(&self) -> Option<f64> {
        self.last_signal
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples
    }

    /// Replace thresholds. Counters and state are kept.
    pub fn set_thresholds(&mut self, thresholds: DetectorThresholds) -> Result<(), RigError> {
        thresholds.validate()?;
        info!("Detector thresholds updated: {:?}", thresholds);
        self.thresholds = thresholds;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.above = 0;
        self.below = 0;
        self.cooldown_since = None;
        self.continuing = false;
    }

    /// Leave Cooldown once the cooldown duration has passed
    pub fn poll(&mut self, now: Duration) -> Option<Transition> {
        let since = self.cooldown_since?;
        if self.state != DetectorState::Cooldown
            || now.saturating_sub(since) < self.thresholds.cooldown
        {
            return None;
        }
        self.cooldown_since = None;
        Some(self.enter(DetectorState::Idle, now, None))
    }

    /// Feed one sample. May yield more than one transition, e.g. an expired
    /// cooldown followed by a fresh crossing.
    pub fn process(&mut self, sample: MotionSample) -> Vec<Transition> {
        self.samples += 1;
        self.last_signal = Some(sample.signal);

        let mut transitions = Vec::new();
        transitions.extend(self.poll(sample.timestamp));

        let t = self.thresholds;
        let exceeds = sample.signal > t.motion_threshold;
        let released = sample.signal < t.release_threshold;
        let at = sample.timestamp;

        match self.state {
            DetectorState::Idle => {
                if exceeds {
                    self.continuing = false;
                    self.above = 1;
                    transitions.push(self.enter(DetectorState::MotionDetected, at, None));
                    transitions.extend(self.confirm_if_ready(at));
                }
            }
            DetectorState::MotionDetected => {
                if exceeds {
                    self.above += 1;
                    transitions.extend(self.confirm_if_ready(at));
                } else {
                    // False alarm; a failed continuation ends the held session now
                    let command = self
                        .continuing
                        .then_some(DetectorCommand::StopRecording {
                            grace: Duration::ZERO,
                        });
                    self.continuing = false;
                    self.above = 0;
                    transitions.push(self.enter(DetectorState::Idle, at, command));
                }
            }
            DetectorState::Recording => {
                if released {
                    self.below += 1;
                    if self.below >= t.release_confirmation_frames {
                        let grace = t.cooldown;
                        self.below = 0;
                        self.cooldown_since = Some(at);
                        transitions.push(self.enter(
                            DetectorState::Cooldown,
                            at,
                            Some(DetectorCommand::StopRecording { grace }),
                        ));
                    }
                } else {
                    self.below = 0;
                }
            }
            DetectorState::Cooldown => {
                if exceeds {
                    self.cooldown_since = None;
                    self.continuing = true;
                    self.above = 1;
                    transitions.push(self.enter(
                        DetectorState::MotionDetected,
                        at,
                        Some(DetectorCommand::HoldStop),
                    ));
                    transitions.extend(self.confirm_if_ready(at));
                }
            }
        }

        transitions
    }

    fn confirm_if_ready(&mut self, at: Duration) -> Option<Transition> {
        if self.state != DetectorState::MotionDetected
            || self.above < self.thresholds.confirmation_frames
        {
            return None;
        }
        self.above = 0;
        self.below = 0;
        self.continuing = false;
        Some(self.enter(
            DetectorState::Recording,
            at,
            Some(DetectorCommand::StartRecording),
        ))
    }

    fn enter(
        &mut self,
        to: DetectorState,
        at: Duration,
        command: Option<DetectorCommand>,
    ) -> Transition {
        let from = self.state;
        self.state = to;
        debug!("Detector {:?} -> {:?} at {:?} ({:?})", from, to, at, command);
        Transition {
            from,
            to,
            at,
            command,
        }
    }
}

/// Passes every Nth item
#[derive(Debug, Clone)]
pub struct Subsampler {
    factor: u32,
    counter: u32,
}

impl Subsampler {
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
            counter: 0,
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    pub fn accept(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.factor {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> DetectorThresholds {
        DetectorThresholds {
            motion_threshold: 20.0,
            release_threshold: 5.0,
            confirmation_frames: 3,
            release_confirmation_frames: 3,
            cooldown: Duration::from_secs(2),
        }
    }

    fn feed(detector: &mut MotionDetector, at_ms: u64, signal: f64) -> Vec<Transition> {
        detector.process(MotionSample::new(Duration::from_millis(at_ms), signal))
    }

    #[test]
    fn test_validate_rejects_release_above_motion() {
        let bad = DetectorThresholds {
            release_threshold: 30.0,
            ..thresholds()
        };
        assert!(matches!(bad.validate(), Err(RigError::InvalidConfig(_))));
        assert!(MotionDetector::new(bad).is_err());
    }

    #[test]
    fn test_equal_to_threshold_does_not_exceed() {
        let mut d = MotionDetector::new(thresholds()).expect("detector");
        assert!(feed(&mut d, 0, 20.0).is_empty());
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn test_single_confirmation_frame_goes_straight_to_recording() {
        let mut d = MotionDetector::new(DetectorThresholds {
            confirmation_frames: 1,
            ..thresholds()
        })
        .expect("detector");
        let t = feed(&mut d, 0, 50.0);
        assert_eq!(t.len(), 2);
        assert_eq!(t[1].command, Some(DetectorCommand::StartRecording));
        assert_eq!(d.state(), DetectorState::Recording);
    }

    #[test]
    fn test_release_streak_resets_on_high_sample() {
        let mut d = MotionDetector::new(thresholds()).expect("detector");
        for (i, s) in [25.0, 25.0, 25.0].iter().enumerate() {
            feed(&mut d, i as u64 * 66, *s);
        }
        assert_eq!(d.state(), DetectorState::Recording);

        feed(&mut d, 300, 1.0);
        feed(&mut d, 366, 1.0);
        feed(&mut d, 433, 10.0);
        feed(&mut d, 500, 1.0);
        feed(&mut d, 566, 1.0);
        assert_eq!(d.state(), DetectorState::Recording);
        let t = feed(&mut d, 633, 1.0);
        assert_eq!(t[0].to, DetectorState::Cooldown);
    }

    #[test]
    fn test_poll_ends_cooldown() {
        let mut d = MotionDetector::new(thresholds()).expect("detector");
        for (i, s) in [25.0, 25.0, 25.0, 0.0, 0.0, 0.0].iter().enumerate() {
            feed(&mut d, i as u64 * 100, *s);
        }
        assert_eq!(d.state(), DetectorState::Cooldown);
        assert!(d.poll(Duration::from_millis(2400)).is_none());
        let t = d.poll(Duration::from_millis(2500)).expect("transition");
        assert_eq!(t.to, DetectorState::Idle);
        assert!(t.command.is_none());
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut d = MotionDetector::new(thresholds()).expect("detector");
        feed(&mut d, 0, 30.0);
        assert_eq!(d.state(), DetectorState::MotionDetected);
        d.reset();
        assert_eq!(d.state(), DetectorState::Idle);
        // Counters were cleared too
        feed(&mut d, 100, 30.0);
        feed(&mut d, 200, 30.0);
        assert_eq!(d.state(), DetectorState::MotionDetected);
    }

    #[test]
    fn test_subsampler_every_nth() {
        let mut s = Subsampler::new(4);
        let accepted: Vec<bool> = (0..8).map(|_| s.accept()).collect();
        assert_eq!(
            accepted,
            vec![false, false, false, true, false, false, false, true]
        );
        assert!(Subsampler::new(0).accept());
    }
}
