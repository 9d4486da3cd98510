//! Benchmarks for the hot paths between capture and the writer thread
//!
//! Run with: cargo bench --bench sync_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use swingcam::detector::{FrameDifferenceSignal, SignalExtractor};
use swingcam::ring_buffer::DropOldestQueue;
use swingcam::sync::FrameSynchronizer;
use swingcam::testing::synthetic_frame;
use swingcam::{CameraId, Frame};

const INTERVAL_US: u64 = 16_667;

fn bench_synchronizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("FrameSynchronizer");
    group.throughput(Throughput::Elements(1));

    // Pixels are reference counted, so pairing cost does not depend on size
    let frame_a = synthetic_frame(CameraId::Primary, 1, 0, 64, 48);
    let frame_b = synthetic_frame(CameraId::Secondary, 1, 0, 64, 48);

    for skew_us in [0u64, 4_000, 40_000] {
        group.bench_with_input(BenchmarkId::new("tick", skew_us), &skew_us, |b, &skew| {
            let qa = DropOldestQueue::new(2);
            let qb = DropOldestQueue::new(2);
            let mut sync = FrameSynchronizer::new(INTERVAL_US / 2);
            let mut seq = 0u64;
            b.iter(|| {
                seq += 1;
                let ts = seq * INTERVAL_US;
                qa.push(Frame {
                    sequence: seq,
                    timestamp_us: ts,
                    ..frame_a.clone()
                });
                qb.push(Frame {
                    sequence: seq,
                    timestamp_us: ts + skew,
                    ..frame_b.clone()
                });
                black_box(sync.tick(&qa, &qb))
            });
        });
    }

    group.bench_function("tick_empty", |b| {
        let qa: DropOldestQueue<Frame> = DropOldestQueue::new(2);
        let qb: DropOldestQueue<Frame> = DropOldestQueue::new(2);
        let mut sync = FrameSynchronizer::for_fps(60);
        b.iter(|| black_box(sync.tick(&qa, &qb)));
    });

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("DropOldestQueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_evicting", |b| {
        let q = DropOldestQueue::new(8);
        for i in 0..8u64 {
            q.push(i);
        }
        let mut i = 8u64;
        b.iter(|| {
            i += 1;
            black_box(q.push(i))
        });
    });

    group.bench_function("push_pop", |b| {
        let q = DropOldestQueue::new(8);
        b.iter(|| {
            q.push(black_box(1u64));
            black_box(q.try_pop())
        });
    });

    group.finish();
}

fn bench_motion_signal(c: &mut Criterion) {
    let mut group = c.benchmark_group("FrameDifferenceSignal");
    group.measurement_time(Duration::from_secs(5));

    for (width, height, name) in [(320u32, 240u32, "240p"), (1280, 720, "720p")] {
        let frames: Vec<Frame> = (0..2)
            .map(|i| synthetic_frame(CameraId::Primary, i + 1, i * INTERVAL_US, width, height))
            .collect();
        group.throughput(Throughput::Bytes((width * height * 3) as u64));
        group.bench_with_input(BenchmarkId::new("extract", name), &frames, |b, frames| {
            let mut signal = FrameDifferenceSignal::default();
            let mut i = 0usize;
            b.iter(|| {
                i += 1;
                black_box(signal.extract_signal(&frames[i % 2]))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_synchronizer, bench_queue, bench_motion_signal);
criterion_main!(benches);
