//! Downstream hand-off of completed recordings

use log::info;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::recording::RecordingSession;

/// Receives the two files of every session that closed cleanly
pub trait AnalysisHandoff: Send + Sync {
    fn session_complete(&self, session: &RecordingSession, files: &[PathBuf]);
}

/// Logs completed sessions; the default when nothing downstream is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandoff;

impl AnalysisHandoff for LoggingHandoff {
    fn session_complete(&self, session: &RecordingSession, files: &[PathBuf]) {
        info!(
            "Session {} ready for analysis: {} pairs in {:?}",
            session.id, session.frames_written, files
        );
    }
}

/// Collects hand-offs in memory
#[derive(Debug, Default)]
pub struct CollectingHandoff {
    completed: Mutex<Vec<(RecordingSession, Vec<PathBuf>)>>,
}

impl CollectingHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> Vec<(RecordingSession, Vec<PathBuf>)> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AnalysisHandoff for CollectingHandoff {
    fn session_complete(&self, session: &RecordingSession, files: &[PathBuf]) {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((session.clone(), files.to_vec()));
    }
}
