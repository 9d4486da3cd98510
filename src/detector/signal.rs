//! Scalar motion signals derived from frames

use std::collections::VecDeque;

use crate::types::Frame;

/// Turns a frame into a scalar motion value. `None` means "no reading"
/// (e.g. no pose found), not zero motion.
pub trait SignalExtractor: Send {
    fn extract_signal(&mut self, frame: &Frame) -> Option<f64>;

    /// Called when the detector settles back to Idle
    fn on_idle(&mut self) {}
}

impl<E: SignalExtractor + ?Sized> SignalExtractor for Box<E> {
    fn extract_signal(&mut self, frame: &Frame) -> Option<f64> {
        (**self).extract_signal(frame)
    }

    fn on_idle(&mut self) {
        (**self).on_idle()
    }
}

/// Repeats the previous value when the inner extractor has no reading
#[derive(Debug, Clone)]
pub struct HoldLastValue<E> {
    inner: E,
    last: Option<f64>,
}

impl<E: SignalExtractor> HoldLastValue<E> {
    pub fn new(inner: E) -> Self {
        Self { inner, last: None }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

impl<E: SignalExtractor> SignalExtractor for HoldLastValue<E> {
    fn extract_signal(&mut self, frame: &Frame) -> Option<f64> {
        if let Some(value) = self.inner.extract_signal(frame) {
            self.last = Some(value);
        }
        self.last
    }

    fn on_idle(&mut self) {
        self.inner.on_idle();
    }
}

/// Normalized pose landmark; `z` grows away from the camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            visibility: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShoulderLandmarks {
    pub left: Landmark,
    pub right: Landmark,
}

/// Pose estimation black box
pub trait PoseEstimator: Send {
    fn estimate(&mut self, frame: &Frame) -> Option<ShoulderLandmarks>;
}

/// Shoulder-line rotation away from the camera plane, in degrees.
///
/// Returns `None` when the shoulders are stacked in x, where the angle is
/// undefined.
pub fn shoulder_turn_degrees(left: &Landmark, right: &Landmark) -> Option<f64> {
    let dx = (right.x - left.x).abs();
    if dx < 1e-9 {
        return None;
    }
    Some((right.z - left.z).atan2(dx).to_degrees())
}

/// Shoulder turn from a pose estimator
pub struct ShoulderTurnSignal<P> {
    estimator: P,
    min_visibility: f64,
}

impl<P: PoseEstimator> ShoulderTurnSignal<P> {
    pub fn new(estimator: P) -> Self {
        Self {
            estimator,
            min_visibility: 0.5,
        }
    }

    pub fn with_min_visibility(mut self, min_visibility: f64) -> Self {
        self.min_visibility = min_visibility;
        self
    }
}

impl<P: PoseEstimator> SignalExtractor for ShoulderTurnSignal<P> {
    fn extract_signal(&mut self, frame: &Frame) -> Option<f64> {
        let pose = self.estimator.estimate(frame)?;
        if pose.left.visibility < self.min_visibility || pose.right.visibility < self.min_visibility
        {
            return None;
        }
        shoulder_turn_degrees(&pose.left, &pose.right)
    }
}

const BASELINE_WINDOW: usize = 10;
const BASELINE_MIN_READINGS: usize = 3;

/// Reports distance from a resting baseline.
///
/// The baseline is the median of the first three readings and is re-taken
/// from the recent history whenever the detector returns to Idle.
#[derive(Debug, Clone)]
pub struct BaselineDelta<E> {
    inner: E,
    history: VecDeque<f64>,
    baseline: Option<f64>,
}

impl<E: SignalExtractor> BaselineDelta<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            history: VecDeque::with_capacity(BASELINE_WINDOW),
            baseline: None,
        }
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    fn median(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = self.history.iter().copied().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        Some(if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        })
    }
}

impl<E: SignalExtractor> SignalExtractor for BaselineDelta<E> {
    fn extract_signal(&mut self, frame: &Frame) -> Option<f64> {
        let value = self.inner.extract_signal(frame)?;
        if self.history.len() == BASELINE_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(value);

        if self.baseline.is_none() {
            if self.history.len() < BASELINE_MIN_READINGS {
                return None;
            }
            self.baseline = self.median();
        }
        self.baseline.map(|b| (value - b).abs())
    }

    fn on_idle(&mut self) {
        self.inner.on_idle();
        if let Some(b) = self.median() {
            self.baseline = Some(b);
        }
    }
}

/// Mean absolute luma change between consecutive sampled frames, 0..=255.
///
/// Needs no pose model; only every `stride`th pixel is compared.
#[derive(Debug, Clone)]
pub struct FrameDifferenceSignal {
    stride: usize,
    previous: Vec<u8>,
    dims: (u32, u32),
}

impl Default for FrameDifferenceSignal {
    fn default() -> Self {
        Self::new(4)
    }
}

impl FrameDifferenceSignal {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
            previous: Vec::new(),
            dims: (0, 0),
        }
    }

    fn luma(&self, frame: &Frame) -> Vec<u8> {
        frame
            .pixels
            .chunks_exact(3)
            .step_by(self.stride)
            .map(|px| ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8)
            .collect()
    }
}

impl SignalExtractor for FrameDifferenceSignal {
    fn extract_signal(&mut self, frame: &Frame) -> Option<f64> {
        let luma = self.luma(frame);
        let dims = (frame.width, frame.height);

        let value = if dims == self.dims && luma.len() == self.previous.len() && !luma.is_empty() {
            let total: u64 = luma
                .iter()
                .zip(&self.previous)
                .map(|(a, b)| a.abs_diff(*b) as u64)
                .sum();
            Some(total as f64 / luma.len() as f64)
        } else {
            None
        };

        self.previous = luma;
        self.dims = dims;
        value
    }
}
