//! Property tests for H.264 encoding and the MP4 writer
//!
//! Run with: cargo test --test recording_props --features recording

use proptest::prelude::*;
use tempfile::tempdir;

use swingcam::recording::{Codec, DefaultWriterFactory, H264Encoder, H264Mp4Writer, VideoWriter, WriterFactory};
use swingcam::testing::synthetic_frame;
use swingcam::{CameraId, VideoParams};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any even frame size is accepted
    #[test]
    fn encoder_accepts_even_dimensions(
        half_w in 8u32..160,
        half_h in 8u32..120,
        fps in 15.0f64..120.0,
    ) {
        let result = H264Encoder::new(half_w * 2, half_h * 2, fps, 2_000_000);
        prop_assert!(result.is_ok(), "{:?}", result.err());
    }

    /// Odd sizes cannot be chroma-subsampled
    #[test]
    fn encoder_rejects_odd_dimensions(w in 1u32..200, h in 1u32..200) {
        prop_assume!(w % 2 == 1 || h % 2 == 1);
        prop_assert!(H264Encoder::new(w, h, 30.0, 1_000_000).is_err());
    }

    /// Output is Annex B and the first frame is a keyframe
    #[test]
    fn first_frame_is_annex_b_keyframe(level in 0u8..=255) {
        let (w, h) = (64u32, 48u32);
        let mut encoder = H264Encoder::new(w, h, 30.0, 1_000_000).expect("encoder");
        let encoded = encoder
            .encode_rgb(&vec![level; (w * h * 3) as usize])
            .expect("encode");

        prop_assert!(!encoded.data.is_empty());
        prop_assert!(encoded.is_keyframe);
        prop_assert!(
            encoded.data.starts_with(&[0, 0, 0, 1]) || encoded.data.starts_with(&[0, 0, 1])
        );
        prop_assert_eq!(encoder.frame_count(), 1);
    }

    /// The writer counts every submitted frame and produces a non-empty file
    #[test]
    fn writer_frame_count_matches(frames in 1u64..20) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("clip_camera1.mp4");
        let params = VideoParams::new(64, 48, 60.0);

        let mut writer = H264Mp4Writer::create(&path, params, 1_000_000, Some("swingcam"))
            .expect("writer");
        for seq in 1..=frames {
            let frame = synthetic_frame(CameraId::Primary, seq, seq * 16_667, 64, 48);
            writer.write_frame(&frame).expect("write");
        }
        prop_assert_eq!(writer.frames_written(), frames);

        let stats = Box::new(writer).finish().expect("finish");
        prop_assert_eq!(stats.frames, frames);
        prop_assert_eq!(stats.codec, Codec::H264);
        prop_assert!(stats.bytes_written > 0);
        let on_disk = std::fs::metadata(&path).expect("metadata").len();
        prop_assert!(on_disk > 0);
    }
}

#[test]
fn default_factory_prefers_h264_when_compiled_in() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("clip_camera2.mp4");
    let params = VideoParams::new(32, 32, 30.0);

    let mut writer = DefaultWriterFactory::default()
        .create(Codec::H264, &path, &params)
        .expect("h264 writer");
    writer
        .write_frame(&synthetic_frame(CameraId::Secondary, 1, 0, 32, 32))
        .expect("write");
    let stats = writer.finish().expect("finish");

    let bytes = std::fs::read(&path).expect("read mp4");
    // ISO BMFF files open with an `ftyp` box
    assert_eq!(&bytes[4..8], b"ftyp");
    assert_eq!(stats.frames, 1);
}

#[test]
fn writer_rejects_mismatched_frame() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("clip.mp4");
    let mut writer =
        H264Mp4Writer::create(&path, VideoParams::new(32, 32, 30.0), 1_000_000, None).expect("writer");
    let wrong = synthetic_frame(CameraId::Primary, 1, 0, 16, 16);
    assert!(writer.write_frame(&wrong).is_err());
    assert_eq!(writer.frames_written(), 0);
}

#[test]
fn staged_frame_reaches_the_file_only_on_commit() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("clip.mp4");
    let mut writer =
        H264Mp4Writer::create(&path, VideoParams::new(32, 32, 30.0), 1_000_000, None).expect("writer");

    writer
        .stage_frame(&synthetic_frame(CameraId::Primary, 1, 0, 32, 32))
        .expect("stage");
    assert_eq!(writer.frames_written(), 0);
    writer.commit_frame().expect("commit");
    assert_eq!(writer.frames_written(), 1);

    // Muxed samples stay put
    assert!(writer.rollback_last().is_err());
    assert_eq!(writer.frames_written(), 1);
}
