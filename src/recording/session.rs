//! Recording session records, file naming and the metadata sidecar

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use super::codec::Codec;
use super::writer::WriterStats;
use crate::errors::RigError;
use crate::types::{CameraId, VideoParams};

/// What started a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTrigger {
    Manual,
    Motion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Stopped,
}

/// One recording interval and its two output files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub trigger: SessionTrigger,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub state: SessionState,
    pub codec: Option<Codec>,
    pub files: Vec<PathBuf>,
    pub frames_written: u64,
    pub dropped_pairs: u64,
    /// Set when the session ended because of a failure
    pub error: Option<String>,
}

impl RecordingSession {
    pub fn new(trigger: SessionTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            started_at: Local::now(),
            ended_at: None,
            state: SessionState::Active,
            codec: None,
            files: Vec::new(),
            frames_written: 0,
            dropped_pairs: 0,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Wall time since start, or the full duration once stopped
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Local::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    pub fn mark_stopped(&mut self, error: Option<String>) {
        self.state = SessionState::Stopped;
        self.ended_at = Some(Local::now());
        if error.is_some() {
            self.error = error;
        }
    }
}

/// Builds file names for a session: `{prefix}_{YYYYmmdd_HHMMSS_mmm}_camera1.mp4`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNaming {
    directory: PathBuf,
    stem: String,
}

impl SessionNaming {
    pub fn new(directory: impl Into<PathBuf>, prefix: &str, started_at: &DateTime<Local>) -> Self {
        Self {
            directory: directory.into(),
            stem: format!("{}_{}", prefix, started_at.format("%Y%m%d_%H%M%S_%3f")),
        }
    }

    pub fn for_session(directory: impl Into<PathBuf>, prefix: &str, session: &RecordingSession) -> Self {
        Self::new(directory, prefix, &session.started_at)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn video_path(&self, camera: CameraId, codec: Codec) -> PathBuf {
        self.directory
            .join(format!("{}_{}.{}", self.stem, camera.label(), codec.extension()))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.directory.join(format!("{}_session.json", self.stem))
    }
}

/// JSON sidecar describing how to read the two files back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session: RecordingSession,
    pub video: VideoParams,
    pub decoder_hint: Option<String>,
    pub writers: Vec<WriterStats>,
}

impl SessionMetadata {
    pub fn new(session: RecordingSession, video: VideoParams, writers: Vec<WriterStats>) -> Self {
        let decoder_hint = session.codec.map(|c| c.decoder_hint().to_string());
        Self {
            session,
            video,
            decoder_hint,
            writers,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), RigError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RigError::IoError(format!("Failed to serialize session metadata: {}", e)))?;
        fs::write(path, json)
            .map_err(|e| RigError::IoError(format!("Failed to write {:?}: {}", path, e)))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RigError> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| RigError::IoError(format!("Failed to parse {:?}: {}", path, e)))
    }
}
