//! Latency of submitting a batch of jobs and waiting for it to drain,
//! end to end through the scheduler loop.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use forge_core::job::{JobDecl, Priority, StackClass};
use forge_runtime::{JobSystem, JobSystemDesc};
use std::time::Duration;

unsafe extern "C" fn noop(_data: *mut u8) {}

fn make_jobs(n: usize) -> Vec<JobDecl> {
    (0..n)
        .map(|_| JobDecl {
            task: noop,
            data: std::ptr::null_mut(),
            priority: Priority::Normal,
            pinned: 0,
        })
        .collect()
}

fn job_submission_latency(c: &mut Criterion) {
    let desc = JobSystemDesc {
        worker_count: 4,
        fiber_count: 64,
        ..JobSystemDesc::default()
    };
    let system = JobSystem::start(desc).expect("job system starts");

    let mut group = c.benchmark_group("job_submission_latency");
    for &n in &[1usize, 64, 1024, 8192] {
        let jobs = make_jobs(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &jobs, |b, jobs| {
            b.iter(|| {
                let counter = system.run_jobs(jobs, StackClass::Normal);
                system.wait_for_counter_os(counter, Duration::from_micros(50));
            });
        });
    }
    group.finish();

    system.shutdown();
}

criterion_group!(benches, job_submission_latency);
criterion_main!(benches);
