//! Video writers for each supported codec

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::codec::Codec;
use crate::errors::RigError;
use crate::types::{Frame, VideoParams};

/// Summary of one closed writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterStats {
    pub codec: Codec,
    pub path: PathBuf,
    pub frames: u64,
    pub bytes_written: u64,
}

/// A single-file, append-only video writer.
///
/// Frames go through two steps so a pair can be written to two files as a
/// unit: `stage_frame` validates and encodes without touching the file,
/// `commit_frame` appends what was staged. `rollback_last` removes the most
/// recently committed frame when its partner could not be written.
pub trait VideoWriter: Send {
    /// Validate and encode `frame`, replacing any frame staged earlier
    fn stage_frame(&mut self, frame: &Frame) -> Result<(), RigError>;

    /// Append the staged frame to the file
    fn commit_frame(&mut self) -> Result<(), RigError>;

    /// Remove the last committed frame. Only one level of undo is kept.
    fn rollback_last(&mut self) -> Result<(), RigError>;

    fn write_frame(&mut self, frame: &Frame) -> Result<(), RigError> {
        self.stage_frame(frame)?;
        self.commit_frame()
    }

    /// Flush and close the file
    fn finish(self: Box<Self>) -> Result<WriterStats, RigError>;

    fn frames_written(&self) -> u64;
}

/// Constructs writers during codec negotiation
pub trait WriterFactory: Send + Sync {
    fn create(
        &self,
        codec: Codec,
        path: &Path,
        params: &VideoParams,
    ) -> Result<Box<dyn VideoWriter>, RigError>;
}

/// Writers backed by the crate's own encoders
#[derive(Debug, Clone)]
pub struct DefaultWriterFactory {
    pub jpeg_quality: u8,
    pub bitrate: u32,
    pub title: Option<String>,
}

impl Default for DefaultWriterFactory {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            bitrate: 5_000_000,
            title: None,
        }
    }
}

impl WriterFactory for DefaultWriterFactory {
    fn create(
        &self,
        codec: Codec,
        path: &Path,
        params: &VideoParams,
    ) -> Result<Box<dyn VideoWriter>, RigError> {
        match codec {
            #[cfg(feature = "recording")]
            Codec::H264 => Ok(Box::new(H264Mp4Writer::create(
                path,
                *params,
                self.bitrate,
                self.title.as_deref(),
            )?)),
            #[cfg(not(feature = "recording"))]
            Codec::H264 => {
                let _ = (path, params);
                Err(RigError::EncodingError(
                    "H.264 support not compiled in (enable the `recording` feature)".to_string(),
                ))
            }
            Codec::Mjpeg => Ok(Box::new(MjpegWriter::create(
                path,
                *params,
                self.jpeg_quality,
            )?)),
            Codec::RawRgb => Ok(Box::new(RawVideoWriter::create(path, *params)?)),
        }
    }
}

fn create_file(path: &Path) -> Result<BufWriter<File>, RigError> {
    let file = File::create(path).map_err(|e| {
        RigError::IoError(format!("Failed to create output file {:?}: {}", path, e))
    })?;
    Ok(BufWriter::new(file))
}

fn check_frame(frame: &Frame, params: &VideoParams) -> Result<(), RigError> {
    let res = params.resolution;
    if frame.width != res.width || frame.height != res.height {
        return Err(RigError::EncodingError(format!(
            "Frame dimensions {}x{} don't match writer {}",
            frame.width, frame.height, res
        )));
    }
    if frame.pixels.len() != res.rgb_len() {
        return Err(RigError::EncodingError(format!(
            "Invalid frame size: expected {} bytes, got {}",
            res.rgb_len(),
            frame.pixels.len()
        )));
    }
    Ok(())
}

fn nothing_staged(path: &Path) -> RigError {
    RigError::WriteFailed(format!("{:?}: no staged frame to commit", path))
}

/// Frames appended back to back, with the start of the last one remembered
/// so it can be cut off again
struct FrameFile {
    out: BufWriter<File>,
    path: PathBuf,
    len: u64,
    last_start: Option<u64>,
}

impl FrameFile {
    fn create(path: &Path) -> Result<Self, RigError> {
        Ok(Self {
            out: create_file(path)?,
            path: path.to_path_buf(),
            len: 0,
            last_start: None,
        })
    }

    fn append(&mut self, data: &[u8]) -> Result<(), RigError> {
        let start = self.len;
        if let Err(e) = self.out.write_all(data) {
            // Never leave half a frame behind
            if let Err(cut) = self.truncate_to(start) {
                warn!("Partial frame left in {:?}: {}", self.path, cut);
            }
            return Err(RigError::WriteFailed(format!("{:?}: {}", self.path, e)));
        }
        self.len += data.len() as u64;
        self.last_start = Some(start);
        Ok(())
    }

    fn remove_last(&mut self) -> Result<(), RigError> {
        let start = self.last_start.take().ok_or_else(|| {
            RigError::WriteFailed(format!("{:?}: no frame to roll back", self.path))
        })?;
        self.truncate_to(start)
    }

    fn truncate_to(&mut self, len: u64) -> Result<(), RigError> {
        let path = self.path.clone();
        let fail = |what: &str, e: std::io::Error| {
            RigError::WriteFailed(format!("{} {:?} to {} bytes: {}", what, path, len, e))
        };
        self.out.flush().map_err(|e| fail("flush before truncating", e))?;
        self.out.get_ref().set_len(len).map_err(|e| fail("truncate", e))?;
        self.out
            .seek(SeekFrom::Start(len))
            .map_err(|e| fail("seek", e))?;
        self.len = len;
        self.last_start = None;
        Ok(())
    }

    fn finish(mut self, codec: Codec, frames: u64) -> Result<WriterStats, RigError> {
        self.out
            .flush()
            .map_err(|e| RigError::WriteFailed(format!("flush {:?}: {}", self.path, e)))?;
        self.out
            .get_ref()
            .sync_all()
            .map_err(|e| RigError::WriteFailed(format!("sync {:?}: {}", self.path, e)))?;
        Ok(WriterStats {
            codec,
            path: self.path,
            frames,
            bytes_written: self.len,
        })
    }
}

/// Uncompressed RGB24 frames back to back
pub struct RawVideoWriter {
    file: FrameFile,
    params: VideoParams,
    staged: Option<Bytes>,
    frames: u64,
}

impl RawVideoWriter {
    pub fn create(path: &Path, params: VideoParams) -> Result<Self, RigError> {
        Ok(Self {
            file: FrameFile::create(path)?,
            params,
            staged: None,
            frames: 0,
        })
    }
}

impl VideoWriter for RawVideoWriter {
    fn stage_frame(&mut self, frame: &Frame) -> Result<(), RigError> {
        self.staged = None;
        check_frame(frame, &self.params)?;
        self.staged = Some(frame.pixels.clone());
        Ok(())
    }

    fn commit_frame(&mut self) -> Result<(), RigError> {
        let pixels = self
            .staged
            .take()
            .ok_or_else(|| nothing_staged(&self.file.path))?;
        self.file.append(&pixels)?;
        self.frames += 1;
        Ok(())
    }

    fn rollback_last(&mut self) -> Result<(), RigError> {
        self.file.remove_last()?;
        self.frames -= 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<WriterStats, RigError> {
        let this = *self;
        this.file.finish(Codec::RawRgb, this.frames)
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

/// Each frame encoded as a standalone JPEG and appended to one stream
pub struct MjpegWriter {
    file: FrameFile,
    params: VideoParams,
    quality: u8,
    staged: Option<Vec<u8>>,
    frames: u64,
}

impl MjpegWriter {
    pub fn create(path: &Path, params: VideoParams, quality: u8) -> Result<Self, RigError> {
        Ok(Self {
            file: FrameFile::create(path)?,
            params,
            quality: quality.clamp(1, 100),
            staged: None,
            frames: 0,
        })
    }
}

impl VideoWriter for MjpegWriter {
    fn stage_frame(&mut self, frame: &Frame) -> Result<(), RigError> {
        self.staged = None;
        check_frame(frame, &self.params)?;
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode(&frame.pixels, frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|e| RigError::EncodingError(format!("JPEG encoding failed: {}", e)))?;
        self.staged = Some(jpeg);
        Ok(())
    }

    fn commit_frame(&mut self) -> Result<(), RigError> {
        let jpeg = self
            .staged
            .take()
            .ok_or_else(|| nothing_staged(&self.file.path))?;
        self.file.append(&jpeg)?;
        self.frames += 1;
        Ok(())
    }

    fn rollback_last(&mut self) -> Result<(), RigError> {
        self.file.remove_last()?;
        self.frames -= 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<WriterStats, RigError> {
        let this = *self;
        this.file.finish(Codec::Mjpeg, this.frames)
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

#[cfg(feature = "recording")]
pub use h264::H264Mp4Writer;

#[cfg(feature = "recording")]
mod h264 {
    use muxide::api::{Metadata, MuxerBuilder, VideoCodec};
    use std::fs::File;
    use std::io::BufWriter;
    use std::path::{Path, PathBuf};

    use super::{check_frame, create_file, nothing_staged, VideoWriter, WriterStats};
    use crate::errors::RigError;
    use crate::recording::codec::Codec;
    use crate::recording::encoder::{EncodedFrame, H264Encoder};
    use crate::types::{Frame, VideoParams};

    /// H.264 encoded into a fast-start MP4.
    ///
    /// Encoding happens at stage time so a bad frame never reaches the
    /// muxer. Muxed samples cannot be taken back, so `rollback_last` fails.
    pub struct H264Mp4Writer {
        encoder: H264Encoder,
        muxer: muxide::api::Muxer<BufWriter<File>>,
        path: PathBuf,
        params: VideoParams,
        staged: Option<EncodedFrame>,
        frame_index: u64,
        frame_duration_secs: f64,
    }

    impl H264Mp4Writer {
        pub fn create(
            path: &Path,
            params: VideoParams,
            bitrate: u32,
            title: Option<&str>,
        ) -> Result<Self, RigError> {
            let res = params.resolution;
            let encoder = H264Encoder::new(res.width, res.height, params.fps, bitrate)?;
            let writer = create_file(path)?;

            let metadata = match title {
                Some(title) => Metadata::new().with_title(title).with_current_time(),
                None => Metadata::new().with_current_time(),
            };

            let muxer = MuxerBuilder::new(writer)
                .video(VideoCodec::H264, res.width, res.height, params.fps)
                .with_fast_start(true)
                .with_metadata(metadata)
                .build()
                .map_err(|e| RigError::EncodingError(format!("Failed to create muxer: {}", e)))?;

            Ok(Self {
                encoder,
                muxer,
                path: path.to_path_buf(),
                params,
                staged: None,
                frame_index: 0,
                frame_duration_secs: 1.0 / params.fps,
            })
        }
    }

    impl VideoWriter for H264Mp4Writer {
        fn stage_frame(&mut self, frame: &Frame) -> Result<(), RigError> {
            self.staged = None;
            check_frame(frame, &self.params)?;
            self.staged = Some(self.encoder.encode_rgb(&frame.pixels)?);
            Ok(())
        }

        fn commit_frame(&mut self) -> Result<(), RigError> {
            let encoded = self
                .staged
                .take()
                .ok_or_else(|| nothing_staged(&self.path))?;

            // Skipped frames still advance the index so both files keep the
            // same frame timing
            let pts = self.frame_index as f64 * self.frame_duration_secs;
            if !encoded.data.is_empty() {
                self.muxer
                    .write_video(pts, &encoded.data, encoded.is_keyframe)
                    .map_err(|e| RigError::WriteFailed(format!("{:?}: {}", self.path, e)))?;
            }
            self.frame_index += 1;
            Ok(())
        }

        fn rollback_last(&mut self) -> Result<(), RigError> {
            Err(RigError::WriteFailed(format!(
                "{:?}: muxed H.264 samples cannot be removed",
                self.path
            )))
        }

        fn finish(self: Box<Self>) -> Result<WriterStats, RigError> {
            let this = *self;
            let stats = this
                .muxer
                .finish_with_stats()
                .map_err(|e| RigError::WriteFailed(format!("Failed to finalize {:?}: {}", this.path, e)))?;
            Ok(WriterStats {
                codec: Codec::H264,
                path: this.path,
                frames: this.frame_index,
                bytes_written: stats.bytes_written,
            })
        }

        fn frames_written(&self) -> u64 {
            self.frame_index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gradient_pixels, synthetic_frame};
    use crate::types::CameraId;

    #[test]
    fn test_raw_writer_appends_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.rgb");
        let params = VideoParams::new(8, 4, 30.0);

        let mut writer = DefaultWriterFactory::default()
            .create(Codec::RawRgb, &path, &params)
            .expect("raw writer");
        for seq in 1..=3 {
            writer
                .write_frame(&synthetic_frame(CameraId::Primary, seq, seq * 1000, 8, 4))
                .expect("write");
        }
        assert_eq!(writer.frames_written(), 3);

        let stats = writer.finish().expect("finish");
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.bytes_written, 3 * 8 * 4 * 3);
    }

    #[test]
    fn test_mjpeg_writer_emits_jpeg_stream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.mjpeg");
        let params = VideoParams::new(16, 16, 30.0);

        let mut writer = DefaultWriterFactory::default()
            .create(Codec::Mjpeg, &path, &params)
            .expect("mjpeg writer");
        writer
            .write_frame(&synthetic_frame(CameraId::Secondary, 1, 0, 16, 16))
            .expect("write");
        let stats = writer.finish().expect("finish");

        let bytes = std::fs::read(&path).expect("read");
        assert!(bytes.starts_with(&[0xFF, 0xD8]), "JPEG SOI marker expected");
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.bytes_written, bytes.len() as u64);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.rgb");
        let mut writer = RawVideoWriter::create(&path, VideoParams::new(8, 4, 30.0)).expect("raw");
        let err = writer
            .write_frame(&synthetic_frame(CameraId::Primary, 1, 0, 4, 4))
            .unwrap_err();
        assert!(matches!(err, RigError::EncodingError(_)));
    }

    #[test]
    fn test_raw_rollback_cuts_last_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.rgb");
        let mut writer = RawVideoWriter::create(&path, VideoParams::new(8, 4, 30.0)).expect("raw");
        for seq in 1..=3 {
            writer
                .write_frame(&synthetic_frame(CameraId::Primary, seq, seq, 8, 4))
                .expect("write");
        }

        writer.rollback_last().expect("rollback");
        assert_eq!(writer.frames_written(), 2);
        // Only one level of undo
        assert!(writer.rollback_last().is_err());

        // Appending after a rollback continues at the cut
        writer
            .write_frame(&synthetic_frame(CameraId::Primary, 4, 4, 8, 4))
            .expect("write after rollback");
        let stats = Box::new(writer).finish().expect("finish");
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.bytes_written, 3 * 8 * 4 * 3);

        let bytes = std::fs::read(&path).expect("read");
        assert_eq!(bytes.len(), 3 * 8 * 4 * 3);
        assert_eq!(&bytes[2 * 96..], &gradient_pixels(4, 8, 4)[..]);
    }

    #[test]
    fn test_mjpeg_rollback_restores_previous_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.mjpeg");
        let mut writer =
            MjpegWriter::create(&path, VideoParams::new(16, 16, 30.0), 80).expect("mjpeg");
        writer
            .write_frame(&synthetic_frame(CameraId::Primary, 1, 0, 16, 16))
            .expect("first");
        let one_frame = writer.file.len;
        writer
            .write_frame(&synthetic_frame(CameraId::Primary, 2, 1, 16, 16))
            .expect("second");
        writer.rollback_last().expect("rollback");

        let stats = Box::new(writer).finish().expect("finish");
        assert_eq!(stats.frames, 1);
        assert_eq!(std::fs::metadata(&path).expect("meta").len(), one_frame);
    }

    #[test]
    fn test_commit_without_stage_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = RawVideoWriter::create(&dir.path().join("clip.rgb"), VideoParams::new(8, 4, 30.0))
            .expect("raw");
        assert!(matches!(writer.commit_frame(), Err(RigError::WriteFailed(_))));

        // A rejected frame stages nothing
        assert!(writer
            .stage_frame(&synthetic_frame(CameraId::Primary, 1, 0, 4, 4))
            .is_err());
        assert!(writer.commit_frame().is_err());
        assert_eq!(writer.frames_written(), 0);
    }

    #[cfg(not(feature = "recording"))]
    #[test]
    fn test_h264_unavailable_without_feature() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = DefaultWriterFactory::default().create(
            Codec::H264,
            &dir.path().join("clip.mp4"),
            &VideoParams::new(16, 16, 30.0),
        );
        assert!(result.is_err());
    }
}
