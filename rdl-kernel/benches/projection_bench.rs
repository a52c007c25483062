//! rdl-kernel: projection hashing and wire codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rdl_kernel::projection::Projection;

fn sample_projection() -> Projection {
    let mut p = Projection::default();
    p.torus_id = 1;
    p.total_events_processed = 1_000_000;
    p.current_time = 42_000;
    p.active_processes = 4096;
    for i in 0..p.boundary.len() {
        p.boundary[i] = (i % 251) as u8;
    }
    p.initialize_boundary_constraints(2);
    p.initialize_global_constraints();
    p.seal();
    p
}

fn bench_compute_hash(c: &mut Criterion) {
    let p = sample_projection();
    c.bench_function("compute_hash", |b| {
        b.iter(|| black_box(p.compute_hash()));
    });
}

fn bench_verify(c: &mut Criterion) {
    let p = sample_projection();
    c.bench_function("verify", |b| {
        b.iter(|| black_box(p.verify()));
    });
}

fn bench_serialize(c: &mut Criterion) {
    let p = sample_projection();
    c.bench_function("serialize", |b| {
        b.iter(|| black_box(p.serialize()));
    });
}

fn bench_deserialize(c: &mut Criterion) {
    let p = sample_projection();
    let wire = p.serialize();
    c.bench_function("deserialize", |b| {
        b.iter(|| black_box(Projection::deserialize(&wire)));
    });
}

criterion_group!(
    benches,
    bench_compute_hash,
    bench_verify,
    bench_serialize,
    bench_deserialize
);
criterion_main!(benches);
