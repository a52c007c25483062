use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rdl_braid::{BraidCoordinator, ParallelRunner};

fn populated_braid(interval: u64, processes_per_kernel: i32) -> BraidCoordinator {
    let mut braid = BraidCoordinator::new(interval).unwrap();
    for id in 0..3 {
        for i in 0..processes_per_kernel {
            braid.kernel_mut(id).kernel_mut().spawn_process(i, 0, 0);
        }
    }
    braid
}

fn bench_perform_braid_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("perform_braid_exchange");
    for &n in &[0i32, 32, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut braid = populated_braid(100, n);
            b.iter(|| braid.perform_braid_exchange());
        });
    }
    group.finish();
}

fn bench_run_with_periodic_exchange(c: &mut Criterion) {
    c.bench_function("run_1000_ticks_interval_100", |b| {
        b.iter(|| {
            let mut braid = populated_braid(100, 32);
            braid.run(1000)
        });
    });
}

fn bench_detect_and_recover_no_failures(c: &mut Criterion) {
    c.bench_function("detect_and_recover_healthy", |b| {
        let mut braid = populated_braid(100, 32);
        braid.perform_braid_exchange();
        b.iter(|| braid.detect_and_recover());
    });
}

fn bench_parallel_run_for(c: &mut Criterion) {
    c.bench_function("parallel_run_for_50_exchanges", |b| {
        b.iter(|| {
            let mut runner = ParallelRunner::new(20).unwrap();
            runner.start();
            runner.run_for(50);
            runner.stop()
        });
    });
}

criterion_group!(
    benches,
    bench_perform_braid_exchange,
    bench_run_with_periodic_exchange,
    bench_detect_and_recover_no_failures,
    bench_parallel_run_for,
);
criterion_main!(benches);
