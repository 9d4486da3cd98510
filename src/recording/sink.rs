//! Recording sink: codec negotiation, the per-session write buffer and the
//! dedicated writer thread.

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

use super::codec::Codec;
use super::session::{RecordingSession, SessionMetadata, SessionNaming};
use super::writer::{VideoWriter, WriterFactory, WriterStats};
use crate::errors::RigError;
use crate::events::RigEvent;
use crate::ring_buffer::{DropOldestQueue, PushOutcome, QueueClosed};
use crate::types::{CameraId, FramePair, VideoParams};

const WRITER_POLL: Duration = Duration::from_millis(50);

/// Sink configuration derived from `[recording]`
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSettings {
    pub output_directory: PathBuf,
    pub file_prefix: String,
    /// Tried in order when a session opens
    pub codecs: Vec<Codec>,
    pub write_buffer_capacity: usize,
    /// Consecutive buffer drops after which the session is aborted
    pub chronic_drop_limit: u32,
    /// Container frame rate
    pub fps: f64,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("./recordings"),
            file_prefix: "dual_capture".to_string(),
            codecs: Codec::DEFAULT_PREFERENCE.to_vec(),
            write_buffer_capacity: 8,
            chronic_drop_limit: 30,
            fps: 60.0,
        }
    }
}

fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove partial file {:?}: {}", path, e);
        }
    }
}

fn as_write_failure(camera: CameraId, err: RigError) -> RigError {
    match err {
        RigError::WriteFailed(_) => err,
        other => RigError::WriteFailed(format!("{}: {}", camera, other)),
    }
}

/// The two writers of one session, opened with a single negotiated codec
pub struct SessionWriter {
    codec: Codec,
    writer_a: Box<dyn VideoWriter>,
    writer_b: Box<dyn VideoWriter>,
    paths: [PathBuf; 2],
    frames_written: u64,
}

impl SessionWriter {
    /// Open both writers with the first codec in `codecs` that works for
    /// both cameras. A half-open attempt is discarded before the next codec
    /// is tried.
    pub fn open(
        factory: &dyn WriterFactory,
        codecs: &[Codec],
        naming: &SessionNaming,
        params: [VideoParams; 2],
    ) -> Result<Self, RigError> {
        let mut failures = Vec::new();

        for &codec in codecs {
            let path_a = naming.video_path(CameraId::Primary, codec);
            let path_b = naming.video_path(CameraId::Secondary, codec);

            let writer_a = match factory.create(codec, &path_a, &params[0]) {
                Ok(w) => w,
                Err(e) => {
                    warn!("Codec {} unavailable for {}: {}", codec, CameraId::Primary, e);
                    discard_partial(&path_a);
                    failures.push(format!("{}: {}", codec, e));
                    continue;
                }
            };

            let writer_b = match factory.create(codec, &path_b, &params[1]) {
                Ok(w) => w,
                Err(e) => {
                    warn!("Codec {} unavailable for {}: {}", codec, CameraId::Secondary, e);
                    drop(writer_a);
                    discard_partial(&path_a);
                    discard_partial(&path_b);
                    failures.push(format!("{}: {}", codec, e));
                    continue;
                }
            };

            info!(
                "Session writers open with {} ({:?}, {:?})",
                codec, path_a, path_b
            );
            return Ok(Self {
                codec,
                writer_a,
                writer_b,
                paths: [path_a, path_b],
                frames_written: 0,
            });
        }

        Err(RigError::WriteFailed(if failures.is_empty() {
            "no codecs configured".to_string()
        } else {
            format!("no codec could open both writers ({})", failures.join("; "))
        }))
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn paths(&self) -> &[PathBuf; 2] {
        &self.paths
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one pair to both files or to neither. Never retried: an error
    /// here ends the session.
    pub fn write(&mut self, pair: &FramePair) -> Result<(), RigError> {
        self.writer_a
            .stage_frame(&pair.primary)
            .map_err(|e| as_write_failure(CameraId::Primary, e))?;
        self.writer_b
            .stage_frame(&pair.secondary)
            .map_err(|e| as_write_failure(CameraId::Secondary, e))?;

        self.writer_a
            .commit_frame()
            .map_err(|e| as_write_failure(CameraId::Primary, e))?;
        if let Err(e) = self.writer_b.commit_frame() {
            if let Err(rollback) = self.writer_a.rollback_last() {
                error!(
                    "{} keeps an unpaired frame after {} failed: {}",
                    CameraId::Primary,
                    CameraId::Secondary,
                    rollback
                );
            }
            return Err(as_write_failure(CameraId::Secondary, e));
        }

        self.frames_written += 1;
        Ok(())
    }

    /// Finish both writers. Both are always finished; the first error wins.
    pub fn close(self) -> Result<Vec<WriterStats>, RigError> {
        let result_a = self.writer_a.finish();
        let result_b = self.writer_b.finish();
        match (result_a, result_b) {
            (Ok(a), Ok(b)) => Ok(vec![a, b]),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }
}

/// Bounded hand-off between the synchronizer and the writer thread
struct WriteBuffer {
    session_id: Uuid,
    queue: DropOldestQueue<FramePair>,
    chronic_drop_limit: u32,
    consecutive_drops: AtomicU32,
    dropped: AtomicU64,
    frames_written: AtomicU64,
    aborted: AtomicBool,
    abort_reason: Mutex<Option<RigError>>,
    events: Sender<RigEvent>,
}

impl WriteBuffer {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// First abort wins; later calls are ignored
    fn abort(&self, err: RigError) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("Recording session {} aborted: {}", self.session_id, err);
        *self
            .abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
        self.queue.close();
        let _ = self.events.send(RigEvent::SessionFailed {
            session_id: self.session_id,
            error: err,
        });
    }

    fn abort_reason(&self) -> Option<RigError> {
        self.abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Handle to the session currently being written
pub struct ActiveRecording {
    session_id: Uuid,
    codec: Codec,
    files: Vec<PathBuf>,
    params: VideoParams,
    metadata_path: PathBuf,
    buffer: Arc<WriteBuffer>,
    handle: Option<JoinHandle<Result<Vec<WriterStats>, RigError>>>,
}

impl ActiveRecording {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn params(&self) -> VideoParams {
        self.params
    }

    /// Pairs fully written to both files so far
    pub fn frames_written(&self) -> u64 {
        self.buffer.frames_written.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.buffer.dropped.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.buffer.is_aborted()
    }
}

/// Result of closing a session's writers
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub session_id: Uuid,
    pub codec: Codec,
    pub files: Vec<PathBuf>,
    pub params: VideoParams,
    pub metadata_path: PathBuf,
    pub frames_written: u64,
    pub dropped: u64,
    /// Why the session failed, if it did
    pub error: Option<RigError>,
    pub stats: Vec<WriterStats>,
}

impl WriteOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Persists synchronized pairs while a session is open and discards them
/// otherwise.
pub struct RecordingSink {
    settings: SinkSettings,
    factory: Arc<dyn WriterFactory>,
    events: Sender<RigEvent>,
    active: RwLock<Option<Arc<WriteBuffer>>>,
}

impl RecordingSink {
    pub fn new(
        settings: SinkSettings,
        factory: Arc<dyn WriterFactory>,
        events: Sender<RigEvent>,
    ) -> Self {
        Self {
            settings,
            factory,
            events,
            active: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    pub fn is_recording(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Negotiate a codec, open both files and start the writer thread.
    ///
    /// `params` holds the primary and secondary stream parameters.
    pub fn open(
        &self,
        session: &RecordingSession,
        params: [VideoParams; 2],
    ) -> Result<ActiveRecording, RigError> {
        if self.is_recording() {
            return Err(RigError::AlreadyActive);
        }

        fs::create_dir_all(&self.settings.output_directory).map_err(|e| {
            RigError::WriteFailed(format!(
                "Cannot create output directory {:?}: {}",
                self.settings.output_directory, e
            ))
        })?;

        let naming = SessionNaming::for_session(
            &self.settings.output_directory,
            &self.settings.file_prefix,
            session,
        );
        let writer = SessionWriter::open(
            self.factory.as_ref(),
            &self.settings.codecs,
            &naming,
            params,
        )?;
        let codec = writer.codec();
        let files = writer.paths().to_vec();

        let buffer = Arc::new(WriteBuffer {
            session_id: session.id,
            queue: DropOldestQueue::new(self.settings.write_buffer_capacity),
            chronic_drop_limit: self.settings.chronic_drop_limit.max(1),
            consecutive_drops: AtomicU32::new(0),
            dropped: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            abort_reason: Mutex::new(None),
            events: self.events.clone(),
        });

        let thread_buffer = Arc::clone(&buffer);
        let handle = thread::Builder::new()
            .name("swingcam-writer".to_string())
            .spawn(move || run_writer(writer, thread_buffer))
            .map_err(|e| RigError::WriteFailed(format!("Failed to spawn writer thread: {}", e)))?;

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&buffer));
        info!("Recording session {} started ({})", session.id, codec);

        Ok(ActiveRecording {
            session_id: session.id,
            codec,
            files,
            params: params[0],
            metadata_path: naming.metadata_path(),
            buffer,
            handle: Some(handle),
        })
    }

    /// Queue a pair for writing. Returns false when the pair was discarded
    /// because no session is open.
    pub fn submit(&self, pair: FramePair) -> bool {
        let guard = self.active.read().unwrap_or_else(PoisonError::into_inner);
        let buffer = match guard.as_ref() {
            Some(b) if !b.is_aborted() => b,
            _ => return false,
        };

        match buffer.queue.push(pair) {
            PushOutcome::Queued => {
                buffer.consecutive_drops.store(0, Ordering::SeqCst);
                true
            }
            PushOutcome::Replaced(old) => {
                buffer.dropped.fetch_add(1, Ordering::SeqCst);
                let streak = buffer.consecutive_drops.fetch_add(1, Ordering::SeqCst) + 1;
                let dropped = RigError::FrameWriteDropped(format!(
                    "write buffer full, evicted pair at {}us",
                    old.timestamp_us()
                ));
                // One warning per streak
                if streak == 1 {
                    warn!("Session {}: {}", buffer.session_id, dropped);
                } else {
                    debug!("{} ({} in a row)", dropped, streak);
                }
                if streak >= buffer.chronic_drop_limit {
                    buffer.abort(RigError::WriteFailed(format!(
                        "write buffer full for {} consecutive pairs, storage too slow",
                        streak
                    )));
                }
                true
            }
            PushOutcome::Rejected(_) => false,
        }
    }

    /// Stop accepting pairs, let the writer drain what is buffered, and
    /// close both files.
    pub fn close(&self, mut active: ActiveRecording) -> WriteOutcome {
        {
            let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
            if slot
                .as_ref()
                .map_or(false, |b| Arc::ptr_eq(b, &active.buffer))
            {
                *slot = None;
            }
        }
        active.buffer.queue.close();

        let closed = match active.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(RigError::WriteFailed("writer thread panicked".to_string()))),
            None => Err(RigError::WriteFailed("writer already joined".to_string())),
        };

        let (stats, close_error) = match closed {
            Ok(stats) => (stats, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        let error = active.buffer.abort_reason().or(close_error);

        let outcome = WriteOutcome {
            session_id: active.session_id,
            codec: active.codec,
            files: active.files.clone(),
            params: active.params,
            metadata_path: active.metadata_path.clone(),
            frames_written: active.frames_written(),
            dropped: active.dropped(),
            error,
            stats,
        };

        match &outcome.error {
            None => info!(
                "Recording session {} closed: {} pairs written, {} dropped",
                outcome.session_id, outcome.frames_written, outcome.dropped
            ),
            Some(e) => warn!(
                "Recording session {} closed after failure ({} pairs kept): {}",
                outcome.session_id, outcome.frames_written, e
            ),
        }
        outcome
    }

    /// Write the JSON sidecar for a closed session
    pub fn write_metadata(
        &self,
        outcome: &WriteOutcome,
        session: &RecordingSession,
    ) -> Result<PathBuf, RigError> {
        let meta = SessionMetadata::new(session.clone(), outcome.params, outcome.stats.clone());
        meta.save(&outcome.metadata_path)?;
        Ok(outcome.metadata_path.clone())
    }
}

fn run_writer(
    mut writer: SessionWriter,
    buffer: Arc<WriteBuffer>,
) -> Result<Vec<WriterStats>, RigError> {
    loop {
        if buffer.is_aborted() {
            break;
        }
        match buffer.queue.pop_timeout(WRITER_POLL) {
            Ok(Some(pair)) => {
                if let Err(e) = writer.write(&pair) {
                    buffer.abort(e);
                    break;
                }
                buffer
                    .frames_written
                    .store(writer.frames_written(), Ordering::SeqCst);
            }
            Ok(None) => continue,
            Err(QueueClosed) => break,
        }
    }
    debug!(
        "Writer for session {} finishing after {} pairs",
        buffer.session_id,
        writer.frames_written()
    );
    writer.close()
}
