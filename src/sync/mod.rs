//! Frame synchronizer
//!
//! Pairs the heads of the two capture queues when their timestamps are within
//! tolerance. Never waits for a partner: an unmatched frame is discarded once
//! the mismatch has lasted more than one tick.

use log::trace;
use serde::Serialize;

use crate::ring_buffer::DropOldestQueue;
use crate::types::{CameraId, Frame, FramePair};

/// Counters for the status surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub ticks: u64,
    pub pairs_emitted: u64,
    pub discarded_primary: u64,
    pub discarded_secondary: u64,
    /// Frames dropped for arriving out of sequence order
    pub stale_discarded: u64,
    pub max_skew_us: u64,
    pub last_pair_timestamp_us: Option<u64>,
}

impl SyncStats {
    fn count_discard(&mut self, camera: CameraId) {
        match camera {
            CameraId::Primary => self.discarded_primary += 1,
            CameraId::Secondary => self.discarded_secondary += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Head {
    sequence: u64,
    timestamp_us: u64,
}

pub struct FrameSynchronizer {
    tolerance_us: u64,
    mismatch_ticks: u32,
    last_sequence: [Option<u64>; 2],
    stats: SyncStats,
}

impl FrameSynchronizer {
    pub fn new(tolerance_us: u64) -> Self {
        Self {
            tolerance_us,
            mismatch_ticks: 0,
            last_sequence: [None, None],
            stats: SyncStats::default(),
        }
    }

    /// One frame interval at `fps`
    pub fn for_fps(fps: u32) -> Self {
        Self::new((1_000_000.0 / fps.max(1) as f64).round() as u64)
    }

    pub fn tolerance_us(&self) -> u64 {
        self.tolerance_us
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Run one synchronization step over the primary and secondary queues.
    /// Never blocks.
    pub fn tick(
        &mut self,
        primary: &DropOldestQueue<Frame>,
        secondary: &DropOldestQueue<Frame>,
    ) -> Option<FramePair> {
        self.stats.ticks += 1;

        let head_a = self.fresh_head(CameraId::Primary, primary);
        let head_b = self.fresh_head(CameraId::Secondary, secondary);
        let (a, b) = match (head_a, head_b) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                self.mismatch_ticks = 0;
                return None;
            }
        };

        let skew = a.timestamp_us.abs_diff(b.timestamp_us);
        if skew <= self.tolerance_us {
            self.mismatch_ticks = 0;
            return self.take_pair(primary, a, secondary, b);
        }

        self.mismatch_ticks += 1;
        if self.mismatch_ticks > 1 {
            // Drop only the older head; the newer one may still find a partner
            let (camera, queue, head) = if a.timestamp_us < b.timestamp_us {
                (CameraId::Primary, primary, a)
            } else {
                (CameraId::Secondary, secondary, b)
            };
            if queue.pop_if(|f| f.sequence == head.sequence).is_some() {
                self.consume(camera, head.sequence);
                self.stats.count_discard(camera);
                trace!("Discarded {} frame {} (skew {}us)", camera, head.sequence, skew);
            }
        }
        None
    }

    /// Peek a queue head, discarding any frames not newer than the last one
    /// consumed from that camera
    fn fresh_head(&mut self, camera: CameraId, queue: &DropOldestQueue<Frame>) -> Option<Head> {
        loop {
            let head = queue.peek_with(|f| Head {
                sequence: f.sequence,
                timestamp_us: f.timestamp_us,
            })?;
            match self.last_sequence[camera.index()] {
                Some(last) if head.sequence <= last => {
                    queue.pop_if(|f| f.sequence == head.sequence);
                    self.stats.stale_discarded += 1;
                }
                _ => return Some(head),
            }
        }
    }

    fn take_pair(
        &mut self,
        primary: &DropOldestQueue<Frame>,
        a: Head,
        secondary: &DropOldestQueue<Frame>,
        b: Head,
    ) -> Option<FramePair> {
        let frame_a = primary.pop_if(|f| f.sequence == a.sequence);
        if frame_a.is_some() {
            self.consume(CameraId::Primary, a.sequence);
        }
        let frame_b = secondary.pop_if(|f| f.sequence == b.sequence);
        if frame_b.is_some() {
            self.consume(CameraId::Secondary, b.sequence);
        }

        // A head can be evicted by its capture thread between peek and pop;
        // the surviving half has no partner and is dropped
        let (frame_a, frame_b) = match (frame_a, frame_b) {
            (Some(fa), Some(fb)) => (fa, fb),
            (Some(_), None) => {
                self.stats.count_discard(CameraId::Primary);
                return None;
            }
            (None, Some(_)) => {
                self.stats.count_discard(CameraId::Secondary);
                return None;
            }
            (None, None) => return None,
        };

        let pair = FramePair::new(frame_a, frame_b)?;
        let ts = pair.timestamp_us();
        if self.stats.last_pair_timestamp_us.map_or(false, |last| ts <= last) {
            self.stats.count_discard(CameraId::Primary);
            self.stats.count_discard(CameraId::Secondary);
            return None;
        }

        self.stats.pairs_emitted += 1;
        self.stats.max_skew_us = self.stats.max_skew_us.max(pair.sync_skew_us);
        self.stats.last_pair_timestamp_us = Some(ts);
        Some(pair)
    }

    fn consume(&mut self, camera: CameraId, sequence: u64) {
        self.last_sequence[camera.index()] = Some(sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_frame;

    fn push(q: &DropOldestQueue<Frame>, camera: CameraId, seq: u64, ts: u64) {
        q.push(synthetic_frame(camera, seq, ts, 2, 2));
    }

    fn queues() -> (DropOldestQueue<Frame>, DropOldestQueue<Frame>) {
        (DropOldestQueue::new(8), DropOldestQueue::new(8))
    }

    #[test]
    fn test_pairs_within_tolerance() {
        let (a, b) = queues();
        let mut sync = FrameSynchronizer::new(16_667);
        push(&a, CameraId::Primary, 1, 100_000);
        push(&b, CameraId::Secondary, 1, 110_000);

        let pair = sync.tick(&a, &b).expect("pair");
        assert_eq!(pair.sync_skew_us, 10_000);
        assert_eq!(pair.timestamp_us(), 110_000);
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn test_empty_side_yields_nothing() {
        let (a, b) = queues();
        let mut sync = FrameSynchronizer::new(16_667);
        push(&a, CameraId::Primary, 1, 0);
        for _ in 0..5 {
            assert!(sync.tick(&a, &b).is_none());
        }
        assert_eq!(a.len(), 1, "a lone frame is held, not discarded");
    }

    #[test]
    fn test_persistent_skew_discards_older_head_only() {
        let (a, b) = queues();
        let mut sync = FrameSynchronizer::new(10_000);
        push(&a, CameraId::Primary, 1, 0);
        push(&a, CameraId::Primary, 2, 33_000);
        push(&b, CameraId::Secondary, 1, 30_000);

        // First mismatching tick waits
        assert!(sync.tick(&a, &b).is_none());
        assert_eq!(a.len(), 2);

        // Second discards the older primary head, leaving b untouched
        assert!(sync.tick(&a, &b).is_none());
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(sync.stats().discarded_primary, 1);

        let pair = sync.tick(&a, &b).expect("pair");
        assert_eq!(pair.primary.sequence, 2);
        assert_eq!(pair.secondary.sequence, 1);
    }

    #[test]
    fn test_stale_sequence_discarded() {
        let (a, b) = queues();
        let mut sync = FrameSynchronizer::new(10_000);
        push(&a, CameraId::Primary, 5, 100_000);
        push(&b, CameraId::Secondary, 5, 100_000);
        sync.tick(&a, &b).expect("pair");

        push(&a, CameraId::Primary, 4, 200_000);
        push(&a, CameraId::Primary, 6, 210_000);
        push(&b, CameraId::Secondary, 6, 210_000);
        let pair = sync.tick(&a, &b).expect("pair");
        assert_eq!(pair.primary.sequence, 6);
        assert_eq!(sync.stats().stale_discarded, 1);
    }

    #[test]
    fn test_for_fps_tolerance() {
        assert_eq!(FrameSynchronizer::for_fps(60).tolerance_us(), 16_667);
        assert_eq!(FrameSynchronizer::for_fps(30).tolerance_us(), 33_333);
    }
}
