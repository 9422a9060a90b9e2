//! Benchmarks for shard placement and path folding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shardpack::shard_for_path;

fn benchmark_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_for_path");

    for depth in [1, 4, 16].iter() {
        let path = (0..*depth)
            .map(|i| format!("directory{}", i))
            .collect::<Vec<_>>()
            .join("\\")
            + "\\asset.bin";
        group.bench_with_input(BenchmarkId::from_parameter(depth), &path, |b, path| {
            b.iter(|| black_box(shard_for_path(black_box(path))));
        });
    }

    group.finish();
}

fn benchmark_distribution(c: &mut Criterion) {
    let paths: Vec<String> = (0..10_000)
        .map(|i| format!("sounds\\sfx_{:05}.wav", i))
        .collect();

    c.bench_function("place_10k_paths", |b| {
        b.iter(|| {
            let mut counts = [0usize; shardpack::SHARD_COUNT];
            for path in &paths {
                counts[shard_for_path(path) as usize] += 1;
            }
            black_box(counts)
        });
    });
}

criterion_group!(benches, benchmark_placement, benchmark_distribution);
criterion_main!(benches);
