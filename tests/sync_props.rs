//! Property tests for frame pairing
//!
//! Whatever the arrival pattern, emitted pairs are within tolerance, each
//! frame is used at most once, and pair timestamps strictly increase.

use proptest::prelude::*;

use swingcam::ring_buffer::DropOldestQueue;
use swingcam::sync::FrameSynchronizer;
use swingcam::testing::synthetic_frame;
use swingcam::{CameraId, Frame, FramePair};

const INTERVAL_US: u64 = 16_667;

/// Per-camera timestamps: a steady interval with jitter and occasional gaps
fn camera_timeline(len: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec((0u64..6_000, prop::bool::weighted(0.1)), len).prop_map(|steps| {
        let mut ts = 0u64;
        steps
            .into_iter()
            .map(|(jitter, gap)| {
                ts += INTERVAL_US + if gap { 3 * INTERVAL_US } else { 0 };
                ts + jitter
            })
            .collect()
    })
}

fn frames(camera: CameraId, timeline: &[u64]) -> Vec<Frame> {
    timeline
        .iter()
        .enumerate()
        .map(|(i, &ts)| synthetic_frame(camera, i as u64 + 1, ts, 2, 2))
        .collect()
}

/// Interleave arrivals by timestamp and tick after every push
fn run(
    sync: &mut FrameSynchronizer,
    capacity: usize,
    a: Vec<Frame>,
    b: Vec<Frame>,
) -> Vec<FramePair> {
    let qa = DropOldestQueue::new(capacity);
    let qb = DropOldestQueue::new(capacity);
    let mut arrivals: Vec<Frame> = a.into_iter().chain(b).collect();
    arrivals.sort_by_key(|f| f.timestamp_us);

    let mut pairs = Vec::new();
    for frame in arrivals {
        match frame.camera {
            CameraId::Primary => qa.push(frame),
            CameraId::Secondary => qb.push(frame),
        };
        while let Some(pair) = sync.tick(&qa, &qb) {
            pairs.push(pair);
        }
    }
    for _ in 0..8 {
        pairs.extend(sync.tick(&qa, &qb));
    }
    pairs
}

proptest! {
    #[test]
    fn pairs_are_within_tolerance_and_ordered(
        ta in camera_timeline(60),
        tb in camera_timeline(60),
        tolerance in 2_000u64..20_000,
        capacity in 1usize..6,
    ) {
        let mut sync = FrameSynchronizer::new(tolerance);
        let pairs = run(
            &mut sync,
            capacity,
            frames(CameraId::Primary, &ta),
            frames(CameraId::Secondary, &tb),
        );

        for pair in &pairs {
            prop_assert!(pair.sync_skew_us <= tolerance);
            prop_assert_eq!(pair.primary.camera, CameraId::Primary);
            prop_assert_eq!(pair.secondary.camera, CameraId::Secondary);
            prop_assert_eq!(
                pair.sync_skew_us,
                pair.primary.timestamp_us.abs_diff(pair.secondary.timestamp_us)
            );
        }
        for w in pairs.windows(2) {
            prop_assert!(w[1].primary.sequence > w[0].primary.sequence);
            prop_assert!(w[1].secondary.sequence > w[0].secondary.sequence);
            prop_assert!(w[1].timestamp_us() > w[0].timestamp_us());
        }

        let stats = sync.stats();
        prop_assert_eq!(stats.pairs_emitted, pairs.len() as u64);
        prop_assert!(stats.max_skew_us <= tolerance);
    }

    /// Identical timelines pair every frame when nothing is evicted
    #[test]
    fn aligned_streams_pair_completely(timeline in camera_timeline(40)) {
        let mut sync = FrameSynchronizer::new(INTERVAL_US / 2);
        let pairs = run(
            &mut sync,
            64,
            frames(CameraId::Primary, &timeline),
            frames(CameraId::Secondary, &timeline),
        );

        prop_assert_eq!(pairs.len(), timeline.len());
        for (i, pair) in pairs.iter().enumerate() {
            prop_assert_eq!(pair.primary.sequence, i as u64 + 1);
            prop_assert_eq!(pair.sync_skew_us, 0);
        }
        prop_assert_eq!(sync.stats().discarded_primary, 0);
        prop_assert_eq!(sync.stats().discarded_secondary, 0);
    }
}

#[test]
fn one_silent_camera_yields_nothing() {
    let mut sync = FrameSynchronizer::for_fps(60);
    let timeline: Vec<u64> = (1..=30).map(|i| i * INTERVAL_US).collect();
    let pairs = run(&mut sync, 4, frames(CameraId::Primary, &timeline), Vec::new());
    assert!(pairs.is_empty());
    assert_eq!(sync.stats().pairs_emitted, 0);
}

#[test]
fn constant_offset_beyond_tolerance_drains_older_stream() {
    // Secondary runs 40ms behind; nothing may pair, older heads get dropped
    let mut sync = FrameSynchronizer::new(5_000);
    let ta: Vec<u64> = (1..=20).map(|i| i * INTERVAL_US + 40_000).collect();
    let tb: Vec<u64> = (1..=20).map(|i| i * INTERVAL_US * 10).collect();
    let pairs = run(
        &mut sync,
        4,
        frames(CameraId::Primary, &ta),
        frames(CameraId::Secondary, &tb),
    );
    for pair in &pairs {
        assert!(pair.sync_skew_us <= 5_000);
    }
    let stats = sync.stats();
    assert!(stats.discarded_primary + stats.discarded_secondary > 0);
}
