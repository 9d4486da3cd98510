//! Scripted stand-ins for the pose model and the video writers

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::detector::SignalExtractor;
use crate::errors::RigError;
use crate::recording::{
    Codec, DefaultWriterFactory, VideoWriter, WriterFactory, WriterStats,
};
use crate::types::{CameraId, Frame, VideoParams};

/// Replays a fixed list of readings, then reports "no reading"
#[derive(Debug, Clone, Default)]
pub struct ScriptedSignal {
    script: VecDeque<Option<f64>>,
    idle_calls: Arc<AtomicU32>,
}

impl ScriptedSignal {
    pub fn new(script: Vec<Option<f64>>) -> Self {
        Self {
            script: script.into(),
            idle_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Every value present
    pub fn values(values: &[f64]) -> Self {
        Self::new(values.iter().copied().map(Some).collect())
    }

    /// Shared counter of `on_idle` calls, readable after the signal moves
    /// into a detector thread
    pub fn idle_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.idle_calls)
    }
}

impl SignalExtractor for ScriptedSignal {
    fn extract_signal(&mut self, _frame: &Frame) -> Option<f64> {
        self.script.pop_front().flatten()
    }

    fn on_idle(&mut self) {
        self.idle_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wraps [`DefaultWriterFactory`] and injects failures
#[derive(Debug, Clone, Default)]
pub struct FailingWriterFactory {
    inner: DefaultWriterFactory,
    refused: Vec<(Codec, CameraId)>,
    fail_on_write: Option<(CameraId, u64)>,
}

impl FailingWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating `codec` writers for `camera` fails
    pub fn refuse_codec_for(mut self, codec: Codec, camera: CameraId) -> Self {
        self.refused.push((codec, camera));
        self
    }

    /// The `nth` write (1-based) to `camera`'s writer fails
    pub fn fail_on_write(mut self, camera: CameraId, nth: u64) -> Self {
        self.fail_on_write = Some((camera, nth));
        self
    }
}

fn camera_for_path(path: &Path) -> Option<CameraId> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    CameraId::ALL
        .into_iter()
        .find(|camera| stem.ends_with(camera.label()))
}

impl WriterFactory for FailingWriterFactory {
    fn create(
        &self,
        codec: Codec,
        path: &Path,
        params: &VideoParams,
    ) -> Result<Box<dyn VideoWriter>, RigError> {
        let camera = camera_for_path(path);
        if let Some(camera) = camera {
            if self.refused.contains(&(codec, camera)) {
                return Err(RigError::EncodingError(format!(
                    "{} refused for {}",
                    codec, camera
                )));
            }
        }

        let writer = self.inner.create(codec, path, params)?;
        match (camera, self.fail_on_write) {
            (Some(camera), Some((target, nth))) if camera == target => Ok(Box::new(FailingWriter {
                inner: writer,
                fail_on: nth,
                attempts: 0,
            })),
            _ => Ok(writer),
        }
    }
}

struct FailingWriter {
    inner: Box<dyn VideoWriter>,
    fail_on: u64,
    attempts: u64,
}

impl VideoWriter for FailingWriter {
    fn stage_frame(&mut self, frame: &Frame) -> Result<(), RigError> {
        self.inner.stage_frame(frame)
    }

    /// Fails at commit time, after the other camera's writer may already
    /// have appended its half of the pair
    fn commit_frame(&mut self) -> Result<(), RigError> {
        self.attempts += 1;
        if self.attempts >= self.fail_on {
            return Err(RigError::WriteFailed(format!(
                "injected failure on write {}",
                self.attempts
            )));
        }
        self.inner.commit_frame()
    }

    fn rollback_last(&mut self) -> Result<(), RigError> {
        self.inner.rollback_last()
    }

    fn finish(self: Box<Self>) -> Result<WriterStats, RigError> {
        self.inner.finish()
    }

    fn frames_written(&self) -> u64 {
        self.inner.frames_written()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_frame;

    #[test]
    fn test_scripted_signal_runs_out() {
        let frame = synthetic_frame(CameraId::Primary, 1, 0, 2, 2);
        let mut s = ScriptedSignal::values(&[1.0, 2.0]);
        assert_eq!(s.extract_signal(&frame), Some(1.0));
        assert_eq!(s.extract_signal(&frame), Some(2.0));
        assert_eq!(s.extract_signal(&frame), None);
    }

    #[test]
    fn test_camera_from_file_name() {
        assert_eq!(
            camera_for_path(Path::new("/x/dual_capture_20240101_000000_000_camera2.rgb")),
            Some(CameraId::Secondary)
        );
        assert_eq!(camera_for_path(Path::new("/x/other.rgb")), None);
    }

    #[test]
    fn test_failing_writer_fails_on_nth() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = FailingWriterFactory::new().fail_on_write(CameraId::Primary, 2);
        let mut writer = factory
            .create(
                Codec::RawRgb,
                &dir.path().join("t_camera1.rgb"),
                &VideoParams::new(2, 2, 30.0),
            )
            .expect("writer");
        writer
            .write_frame(&synthetic_frame(CameraId::Primary, 1, 0, 2, 2))
            .expect("first write");
        assert!(writer
            .write_frame(&synthetic_frame(CameraId::Primary, 2, 1, 2, 2))
            .is_err());
        assert_eq!(writer.finish().expect("finish").frames, 1);
    }
}
