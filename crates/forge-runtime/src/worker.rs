//! Worker thread pool: OS threads pinned to distinct cores, each with its
//! own park/wake semaphore.

use crate::semaphore::Semaphore;
use crate::tls;
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

/// One park/wake semaphore per worker, indexed by worker index. Pinned
/// jobs and fibers carry a pin value of `WorkerIndex::pin_value()`
/// (worker index + 1, 0 meaning unpinned), so resolving a pin to a
/// semaphore is a direct index, never a lookup.
pub struct WorkerSemaphores {
    semaphores: Vec<Semaphore>,
}

impl WorkerSemaphores {
    fn new(num_workers: usize) -> Self {
        Self {
            semaphores: (0..num_workers).map(|_| Semaphore::new()).collect(),
        }
    }

    #[inline]
    pub fn signal(&self, worker: usize) {
        self.semaphores[worker].signal();
    }

    #[inline]
    pub fn wait(&self, worker: usize) {
        self.semaphores[worker].wait();
    }
}

/// Pool of worker OS threads running the scheduler loop.
pub struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
    pin_to_cores: bool,
    started_count: AtomicUsize,
    running: AtomicBool,
    pub semaphores: WorkerSemaphores,
}

impl WorkerPool {
    pub fn new(num_workers: usize, pin_to_cores: bool) -> Self {
        Self {
            handles: Mutex::new(Vec::with_capacity(num_workers)),
            num_workers,
            pin_to_cores,
            started_count: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            semaphores: WorkerSemaphores::new(num_workers),
        }
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::Release);
        for i in 0..self.num_workers {
            self.semaphores.signal(i);
        }
    }

    /// Spawn all worker threads, each running `worker_fn(worker_index)`.
    /// Blocks until every worker has entered its scheduler loop before
    /// returning.
    pub fn start<F>(&self, worker_fn: F)
    where
        F: Fn(usize) + Send + Sync + Clone + 'static,
    {
        self.running.store(true, Ordering::Release);
        let mut handles = self.handles.lock().unwrap();
        for i in 0..self.num_workers {
            let worker_fn = worker_fn.clone();
            let pin_to_cores = self.pin_to_cores;
            let num_workers = self.num_workers;

            let handle = thread::Builder::new()
                .name(format!("forge-worker-{i}"))
                .spawn(move || {
                    tls::set_worker_id(i);
                    if pin_to_cores {
                        pin_to_core(i, num_workers);
                    }
                    worker_fn(i);
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        while self.started_count.load(Ordering::Acquire) < self.num_workers {
            std::hint::spin_loop();
        }
    }

    /// Called by a worker once it has entered its scheduler loop, to count
    /// down the startup barrier `start` waits on.
    pub fn mark_started(&self, _worker: usize) {
        self.started_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn join(&self) {
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn pin_to_core(worker: usize, num_workers: usize) {
    let mut cpu_set = CpuSet::new();
    let available = num_cpus();
    let core = worker % available.max(1);
    if cpu_set.set(core).is_err() {
        return;
    }
    let _ = sched_setaffinity(Pid::from_raw(0), &cpu_set);
    let _ = num_workers;
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
