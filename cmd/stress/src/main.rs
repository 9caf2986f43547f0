//! Stress test: fan out a large number of jobs through the MPMC queues
//! and measure throughput (S4).

use forge::{job, Priority, Runtime, StackClass};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    println!("=== forge stress test ===\n");

    let num_jobs: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);

    println!("Submitting {num_jobs} jobs...");

    let runtime = Runtime::start_default().expect("failed to start job system");
    let completed = Arc::new(AtomicU64::new(0));

    let start = Instant::now();

    let jobs: Vec<_> = (0..num_jobs)
        .map(|_| {
            let completed = Arc::clone(&completed);
            job(
                move || {
                    completed.fetch_add(1, Ordering::Relaxed);
                },
                Priority::Normal,
            )
        })
        .collect();

    let submit_time = start.elapsed();
    println!("Submit time: {submit_time:?}");

    let run_start = Instant::now();
    let counter = runtime.run_jobs(&jobs, StackClass::Normal);
    runtime.wait_for_counter_os(counter, Duration::from_micros(200));
    let run_time = run_start.elapsed();

    let total_time = start.elapsed();

    println!("\n=== Results ===");
    println!("Total jobs:  {num_jobs}");
    println!("Completed:   {}", completed.load(Ordering::Relaxed));
    println!("Submit time: {submit_time:?}");
    println!("Run time:    {run_time:?}");
    println!("Total time:  {total_time:?}");
    println!(
        "Throughput:  {:.0} jobs/sec",
        num_jobs as f64 / total_time.as_secs_f64()
    );

    println!("\n=== Stress Test Complete ===");
}
