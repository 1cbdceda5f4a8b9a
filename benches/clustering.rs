//! Benchmark suite for the clustering stage

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use boat_count::cluster::merge_detections;
use boat_count::types::{ClassLabel, Detection};

/// Deterministic scatter of detections in small groups across the image.
fn scatter(n: usize) -> Vec<Detection> {
    (0..n)
        .map(|i| {
            let group = (i / 3) as f64;
            let jitter = (i % 3) as f64;
            Detection {
                x: (group * 97.0) % 4160.0 + jitter * 2.0,
                y: (group * 61.0) % 4160.0 + jitter * 1.5,
                confidence: 0.5 + (i % 5) as f64 / 10.0,
                class: ClassLabel::Stationary,
                width: 8.0,
                height: 4.0,
                source: "bench".to_string(),
            }
        })
        .collect()
}

fn benchmark_merge_detections(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_detections");

    for size in [30, 120, 480].iter() {
        let detections = scatter(*size);

        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            size,
            |b, _| {
                b.iter(|| merge_detections(black_box(detections.clone()), 6.0))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_merge_detections);
criterion_main!(benches);
