//! Codec identities and the default preference order

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output codec of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264 in an MP4 container (openh264 + muxide)
    H264,
    /// Concatenated baseline JPEG frames
    Mjpeg,
    /// Uncompressed RGB24 frames, lossless last resort
    #[serde(rename = "raw")]
    RawRgb,
}

impl Codec {
    /// H.264 first, then Motion-JPEG, then lossless raw frames
    pub const DEFAULT_PREFERENCE: [Codec; 3] = [Codec::H264, Codec::Mjpeg, Codec::RawRgb];

    /// File extension used for this codec's output
    pub fn extension(self) -> &'static str {
        match self {
            Codec::H264 => "mp4",
            Codec::Mjpeg => "mjpeg",
            Codec::RawRgb => "rgb",
        }
    }

    /// Decoder hint recorded in session metadata
    pub fn decoder_hint(self) -> &'static str {
        match self {
            Codec::H264 => "mp4/h264",
            Codec::Mjpeg => "mjpeg (concatenated JPEG, ffmpeg -f mjpeg)",
            Codec::RawRgb => "rawvideo rgb24 (ffmpeg -f rawvideo -pix_fmt rgb24)",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Mjpeg => "mjpeg",
            Codec::RawRgb => "raw",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Codec::H264),
            "mjpeg" | "mjpg" => Ok(Codec::Mjpeg),
            "raw" | "rgb" | "rawrgb" => Ok(Codec::RawRgb),
            other => Err(format!("unknown codec: {}", other)),
        }
    }
}
