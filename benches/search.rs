//! Benchmarks for graph construction and beam search on synthetic data.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nearline::graph::{build, search::beam_search, GraphParams};
use nearline::{DistanceMetric, EmbeddingStore, VectorSlab};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_slab(n: usize, dim: usize, seed: u64) -> VectorSlab {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut slab = VectorSlab::new(dim);
    for _ in 0..n {
        let v: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        let normalized: Vec<f32> = v.iter().map(|x| x / (norm + 1e-10)).collect();
        slab.push(&normalized).unwrap();
    }
    slab
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    for &n in &[500usize, 2000] {
        let slab = random_slab(n, 64, 42);
        let params = GraphParams::new(16, 64);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &slab, |b, slab| {
            b.iter(|| build::build(slab, DistanceMetric::Cosine, &params).unwrap());
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("beam_search");
    let slab = random_slab(5000, 64, 7);
    let params = GraphParams::new(16, 64);
    let graph = build::build(&slab, DistanceMetric::Cosine, &params).unwrap();
    let store = EmbeddingStore::full(slab);
    let queries = random_slab(64, 64, 99);

    for &ef in &[16usize, 64, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(ef), &ef, |b, &ef| {
            let mut i = 0usize;
            b.iter(|| {
                let query = queries.get(i % queries.len());
                i += 1;
                let mut source = nearline::embedding::ResidentSource::new(&store);
                beam_search(&graph, query, DistanceMetric::Cosine, ef, &mut source)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
