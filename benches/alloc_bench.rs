//! Cost of tracking: the system allocator against the same `malloc` wrapped
//! by a `TrackingAllocator`, plus report generation over a populated table.
//!
//! Both allocators are driven through their `GlobalAlloc` interface directly;
//! the benchmark binary itself keeps the default global allocator.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use memstat::{AllocKind, SourceLocation, Tracker, TrackingAllocator};
use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;

static TRACKED: TrackingAllocator = TrackingAllocator::libc();
static SYS: System = System;

unsafe fn alloc_dealloc(allocator: &dyn GlobalAlloc, layout: Layout) {
    let ptr = unsafe { allocator.alloc(layout) };
    assert!(!ptr.is_null());
    unsafe { allocator.dealloc(ptr, layout) };
}

/// Allocate a batch, free half, repeat; then free the rest.
unsafe fn churn(allocator: &dyn GlobalAlloc, layout: Layout, rounds: usize) {
    let mut live: Vec<*mut u8> = Vec::new();
    for _ in 0..rounds {
        for _ in 0..10 {
            let ptr = unsafe { allocator.alloc(layout) };
            assert!(!ptr.is_null());
            live.push(ptr);
        }
        let drain = live.len() / 2;
        for ptr in live.drain(..drain) {
            unsafe { allocator.dealloc(ptr, layout) };
        }
    }
    for ptr in live {
        unsafe { allocator.dealloc(ptr, layout) };
    }
}

fn bench_single_alloc_dealloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_alloc_dealloc");
    for &size in &[8usize, 64, 1024, 65536] {
        let layout = Layout::from_size_align(size, 8).unwrap();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, _| {
            b.iter(|| unsafe { alloc_dealloc(&System, layout) })
        });
        group.bench_with_input(BenchmarkId::new("tracked", size), &size, |b, _| {
            b.iter(|| unsafe { alloc_dealloc(&TRACKED, layout) })
        });
    }
    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    let rounds = 200;
    let mut group = c.benchmark_group("churn_200_rounds");
    for &size in &[32usize, 2048] {
        let layout = Layout::from_size_align(size, 8).unwrap();
        group.throughput(Throughput::Elements(rounds as u64 * 10));
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, _| {
            b.iter(|| unsafe { churn(&System, layout, rounds) })
        });
        group.bench_with_input(BenchmarkId::new("tracked", size), &size, |b, _| {
            b.iter(|| unsafe { churn(&TRACKED, layout, rounds) })
        });
    }
    group.finish();
}

fn bench_multithreaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("multithreaded_4_threads");
    let ops_per_thread = 5000usize;
    let nthreads = 4;
    group.throughput(Throughput::Elements((ops_per_thread * nthreads) as u64));

    fn mt_workload<A: GlobalAlloc + Sync>(allocator: &'static A, nthreads: usize, ops: usize) {
        let layout = Layout::from_size_align(64, 8).unwrap();
        let handles: Vec<_> = (0..nthreads)
            .map(|_| {
                std::thread::spawn(move || {
                    let mut ptrs: Vec<*mut u8> = Vec::with_capacity(100);
                    for _ in 0..ops {
                        let ptr = unsafe { allocator.alloc(layout) };
                        assert!(!ptr.is_null());
                        ptrs.push(ptr);
                        if ptrs.len() > 50 {
                            for p in ptrs.drain(25..) {
                                unsafe { allocator.dealloc(p, layout) };
                            }
                        }
                    }
                    for p in ptrs {
                        unsafe { allocator.dealloc(p, layout) };
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    group.bench_function("system", |b| {
        b.iter(|| mt_workload(&SYS, nthreads, ops_per_thread))
    });
    group.bench_function("tracked", |b| {
        b.iter(|| mt_workload(&TRACKED, nthreads, ops_per_thread))
    });
    group.finish();
}

fn bench_report(c: &mut Criterion) {
    const SITE: SourceLocation = SourceLocation::new("alloc_bench.rs", 0);
    let mut group = c.benchmark_group("report");

    for &live in &[1_000usize, 100_000] {
        let tracker = Tracker::libc();
        let blocks: Vec<_> = (0..live)
            .map(|i| tracker.allocate(i % 6000 + 1, SITE, AllocKind::Allocate).unwrap())
            .collect();
        group.throughput(Throughput::Elements(live as u64));
        group.bench_with_input(BenchmarkId::new("scan", live), &live, |b, _| {
            b.iter(|| black_box(tracker.report()))
        });
        group.bench_with_input(BenchmarkId::new("scan_and_render", live), &live, |b, _| {
            let mut out = Vec::with_capacity(4096);
            b.iter(|| {
                out.clear();
                tracker.report().render(&mut out).unwrap();
                black_box(out.len())
            })
        });
        for block in blocks {
            unsafe { tracker.release(block.as_ptr(), SITE, AllocKind::Release) };
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_alloc_dealloc,
    bench_churn,
    bench_multithreaded,
    bench_report,
);
criterion_main!(benches);
