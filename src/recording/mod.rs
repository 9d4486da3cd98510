//! Dual-file recording.
//!
//! A [`RecordingSink`] turns synchronized [`FramePair`](crate::types::FramePair)s
//! into two parallel video files, one per camera:
//! - codecs are negotiated once per session in preference order
//!   (H.264/MP4 via openh264 + muxide, Motion-JPEG, raw RGB24)
//! - pairs pass through a bounded drop-oldest buffer to a writer thread so
//!   disk I/O never stalls capture
//! - a JSON sidecar records what was written
//!
//! # Example
//! ```rust,ignore
//! use swingcam::recording::{RecordingSink, RecordingSession, SessionTrigger};
//!
//! let session = RecordingSession::new(SessionTrigger::Manual);
//! let active = sink.open(&session, [params, params])?;
//! sink.submit(pair);
//! let outcome = sink.close(active);
//! ```

mod codec;
#[cfg(feature = "recording")]
mod encoder;
mod session;
mod sink;
mod writer;

pub use codec::Codec;
#[cfg(feature = "recording")]
pub use encoder::{EncodedFrame, H264Encoder};
pub use session::{
    RecordingSession, SessionMetadata, SessionNaming, SessionState, SessionTrigger,
};
pub use sink::{ActiveRecording, RecordingSink, SessionWriter, SinkSettings, WriteOutcome};
#[cfg(feature = "recording")]
pub use writer::H264Mp4Writer;
pub use writer::{
    DefaultWriterFactory, MjpegWriter, RawVideoWriter, VideoWriter, WriterFactory, WriterStats,
};
