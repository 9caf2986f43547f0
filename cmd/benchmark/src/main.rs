//! Benchmark harness covering the job system's core scenarios: plain
//! fan-out/fan-in throughput, nested waits, and worker pinning.

use forge::{job, job_pinned, Priority, Runtime, StackClass};
use forge_core::mpmc::MpmcQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    println!("=== forge benchmark ===\n");

    bench_fan_out_fan_in();
    bench_nested_wait();
    bench_pinning();
    bench_mpmc_queue();

    println!("\n=== Benchmark Complete ===");
}

fn bench_fan_out_fan_in() {
    println!("-- fan-out/fan-in --");
    let runtime = Runtime::start_default().expect("failed to start job system");
    let n = 50_000u64;
    let completed = Arc::new(AtomicU64::new(0));

    let jobs: Vec<_> = (0..n)
        .map(|_| {
            let completed = Arc::clone(&completed);
            job(move || { completed.fetch_add(1, Ordering::Relaxed); }, Priority::Normal)
        })
        .collect();

    let start = Instant::now();
    let counter = runtime.run_jobs(&jobs, StackClass::Normal);
    runtime.wait_for_counter_os(counter, Duration::from_micros(200));
    let elapsed = start.elapsed();

    println!(
        "{n} jobs in {elapsed:?} ({:.0} jobs/sec)",
        n as f64 / elapsed.as_secs_f64()
    );
    runtime.shutdown();
}

fn bench_nested_wait() {
    println!("\n-- nested wait (S2) --");
    let runtime = Runtime::start_default().expect("failed to start job system");
    // Bounded by the fixed extended-fiber reservation (forge_core's
    // EXTENDED_FIBER_COUNT): each nesting level parks on its own extended
    // fiber until its child resolves, so depth must stay below that count.
    let depth = 6u32;
    let reached = Arc::new(AtomicU64::new(0));

    let outer_reached = Arc::clone(&reached);
    let outer = job_pinned(
        move || {
            // Each level submits one child job and waits for it, nesting
            // `depth` counters deep on its own wait-for-counter chain.
            fn recurse(level: u32, depth: u32, reached: Arc<AtomicU64>) {
                if level == depth {
                    reached.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                let reached_for_child = Arc::clone(&reached);
                let child = forge::job(
                    move || recurse(level + 1, depth, reached_for_child),
                    Priority::Normal,
                );
                let counter = forge::run_jobs(&[child], StackClass::Extended);
                forge::wait_for_counter_free(counter);
            }
            recurse(0, depth, outer_reached);
        },
        Priority::Normal,
        0,
    );

    let start = Instant::now();
    let counter = runtime.run_jobs(&[outer], StackClass::Extended);
    runtime.wait_for_counter_os(counter, Duration::from_micros(200));
    let elapsed = start.elapsed();

    println!(
        "{depth}-deep nested wait in {elapsed:?}, reached bottom: {}",
        reached.load(Ordering::Relaxed) == 1
    );
    runtime.shutdown();
}

fn bench_pinning() {
    println!("\n-- pinning (S3) --");
    let runtime = Runtime::start_default().expect("failed to start job system");
    let workers = runtime.worker_count();
    let hits = Arc::new(AtomicU64::new(0));

    let mut jobs = Vec::new();
    for w in 0..workers {
        let pin = runtime.get_pin_index(w);
        let hits = Arc::clone(&hits);
        jobs.push(job_pinned(
            move || {
                hits.fetch_add(1, Ordering::Relaxed);
            },
            Priority::Normal,
            pin,
        ));
    }

    let start = Instant::now();
    let counter = runtime.run_jobs(&jobs, StackClass::Normal);
    runtime.wait_for_counter_os(counter, Duration::from_micros(200));
    let elapsed = start.elapsed();

    println!(
        "{workers} pinned jobs in {elapsed:?}, all ran: {}",
        hits.load(Ordering::Relaxed) as usize == workers
    );
    runtime.shutdown();
}

fn bench_mpmc_queue() {
    println!("\n-- raw MPMC queue (S4) --");
    let queue: MpmcQueue<u64> = MpmcQueue::with_capacity(4096);
    let n = 1_000_000u64;

    let start = Instant::now();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..n {
                while !queue.try_push(i) {
                    std::hint::spin_loop();
                }
            }
        });
        let mut received = 0u64;
        while received < n {
            if queue.pop().is_some() {
                received += 1;
            }
        }
    });
    let elapsed = start.elapsed();
    println!(
        "{n} push/pop pairs in {elapsed:?} ({:.0} ops/sec)",
        n as f64 / elapsed.as_secs_f64()
    );
}
