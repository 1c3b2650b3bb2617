//! Buffer gate and region benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use portmem::memory::{Allocator, BufferPool, DeviceMemoryRegion, PoolConfig, SystemAllocator};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Log to stderr under `RUST_LOG`, warnings only by default.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portmem=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn bench_gate_acquire_return(c: &mut Criterion) {
    init_logging();
    portmem::observability::init_metrics();
    let mut group = c.benchmark_group("gate_acquire_return");

    let pool = BufferPool::with_config(PoolConfig {
        record_metrics: false,
        ..PoolConfig::named("bench")
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("uncontended", |b| {
        b.iter(|| {
            pool.on_buffer_acquired_by_hardware();
            pool.on_buffer_returned();
        });
    });

    group.finish();
}

fn bench_gate_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("gate_concurrent");

    let pool = Arc::new(BufferPool::new());

    group.throughput(Throughput::Elements(400));
    group.bench_function("4_threads_100_cycles_each", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    std::thread::spawn(move || {
                        for _ in 0..100 {
                            pool.on_buffer_acquired_by_hardware();
                            pool.on_buffer_returned();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

fn bench_slot_addressing(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_pointer");

    for slot_count in [4, 16, 64] {
        let region = DeviceMemoryRegion::acquire(None, 4096, slot_count).unwrap();

        group.throughput(Throughput::Elements(slot_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(slot_count),
            &region,
            |b, region| {
                b.iter(|| {
                    for index in 0..region.slot_count() {
                        std::hint::black_box(region.slot_pointer(index));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_system_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("system_allocate_free");
    let allocator = SystemAllocator::new();

    for size in [256, 4096, 65536] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let memory = allocator.allocate(size).expect("heap allocation");
                allocator.free(memory);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_gate_acquire_return,
    bench_gate_concurrent,
    bench_slot_addressing,
    bench_system_allocate
);
criterion_main!(benches);
