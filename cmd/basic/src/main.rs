//! Basic job-system example: fan-out a handful of jobs and fan back in
//! on a single counter (S1).

use forge::{job, Priority, Runtime, StackClass};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    println!("=== forge basic example ===\n");

    let runtime = Runtime::start_default().expect("failed to start job system");
    println!("workers: {}", runtime.worker_count());

    let completed = Arc::new(AtomicUsize::new(0));

    println!("\nSpawning jobs...");
    let mut jobs = Vec::new();
    for i in 0..3 {
        let completed = Arc::clone(&completed);
        jobs.push(job(
            move || {
                println!("[job {i}] started");
                println!("[job {i}] finished");
                completed.fetch_add(1, Ordering::SeqCst);
            },
            Priority::Normal,
        ));
    }

    let high_completed = Arc::clone(&completed);
    jobs.push(job(
        move || {
            println!("[job 3 - HIGH] started");
            println!("[job 3 - HIGH] finished");
            high_completed.fetch_add(1, Ordering::SeqCst);
        },
        Priority::High,
    ));

    let counter = runtime.run_jobs(&jobs, StackClass::Normal);

    println!("\nWaiting for jobs to complete...");
    runtime.wait_for_counter_os(counter, Duration::from_millis(1));

    println!("\n{}/4 jobs completed!", completed.load(Ordering::SeqCst));
    println!("\n=== Example Complete ===");
}
