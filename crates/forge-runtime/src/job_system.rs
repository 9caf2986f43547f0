//! The job system (C7): workers, fibers, wait queue, priority queues,
//! counters, pinning.
//!
//! Grounded on the reference engine's `job_system.c`: a fixed pool of
//! worker threads, each permanently running the same scheduler-loop
//! function on whichever fiber happens to be loaded into it at the time.
//! Fibers migrate between workers; a worker never blocks the OS thread
//! while a job waits, it switches fibers instead.

use crate::config::JobSystemDesc;
use crate::fiber::{FiberEntry, FiberPool, WaitRecord};
use crate::tls;
use crate::worker::{self, WorkerPool};
use forge_core::error::JobError;
use forge_core::ids::{CounterIndex, FiberIndex, WorkerIndex};
use forge_core::job::{InternalJob, JobDecl, Priority, StackClass};
use forge_core::log_debug;
use forge_core::mpmc::MpmcQueue;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

/// The job system itself. Built once per process via `JobSystem::start`
/// and shared through an `Arc`.
pub struct JobSystem {
    fibers: FiberPool,
    counters: forge_core::counter::CounterPool,
    wait_queue: MpmcQueue<WaitRecord>,
    queue_normal: MpmcQueue<InternalJob>,
    queue_high: MpmcQueue<InternalJob>,
    workers: WorkerPool,
    next_wakeup: AtomicUsize,
}

/// Result of one `try_run_one` attempt, distinguishing "found a job but it
/// wasn't ours to run" from "queue was empty" — the two differ in whether
/// they consume this scheduler-loop iteration's turn for that queue.
enum PopOutcome {
    Ran,
    Requeued,
    Empty,
}

/// Raw pointer to the single live `JobSystem`, read by the fiber entry
/// trampoline (which has no way to carry a closure's captured state — see
/// the design notes on global singletons). Set once in `start`, cleared in
/// `shutdown`.
static CURRENT: AtomicPtr<JobSystem> = AtomicPtr::new(std::ptr::null_mut());

impl JobSystem {
    /// Bring up the job system: allocate queues and fibers, spawn workers,
    /// and block until every worker has entered the scheduler loop.
    pub fn start(desc: JobSystemDesc) -> Result<Arc<JobSystem>, JobError> {
        desc.validate().map_err(|e| JobError::Startup(e.to_string()))?;
        crate::config::apply_log_env();

        let fibers = FiberPool::new(desc.fiber_count, desc.worker_count, desc.normal_stack_size, desc.extended_stack_size)
            .map_err(|e| JobError::Startup(e.to_string()))?;
        let counters = forge_core::counter::CounterPool::new(desc.counter_count);
        let wait_queue = MpmcQueue::with_capacity(desc.fiber_count.next_power_of_two());
        let queue_normal = MpmcQueue::with_capacity(desc.job_queue_capacity);
        let queue_high = MpmcQueue::with_capacity(desc.job_queue_capacity);
        let workers = WorkerPool::new(desc.worker_count, desc.pin_workers_to_cores);

        let system = Arc::new(JobSystem {
            fibers,
            counters,
            wait_queue,
            queue_normal,
            queue_high,
            workers,
            next_wakeup: AtomicUsize::new(0),
        });

        // Safety: no fiber has been switched into yet.
        unsafe {
            system.fibers.arm(fiber_entry_trampoline);
        }

        CURRENT.store(Arc::as_ptr(&system) as *mut JobSystem, Ordering::Release);

        system.workers.start({
            let system = Arc::clone(&system);
            move |worker_index| {
                system.run_worker(worker_index);
            }
        });

        log_debug!("job system started: {} workers, {} fibers", desc.worker_count, desc.fiber_count);
        Ok(system)
    }

    /// The pin value for worker `i` (§6: `get_pin_index(i)`, `i ∈ [0, N)`).
    pub fn get_pin_index(&self, i: usize) -> u32 {
        WorkerIndex(i as u32).pin_value()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.num_workers()
    }

    /// Submit `jobs` as a batch, returning the counter id the caller can
    /// `wait_for_counter`/`wait_for_counter_free` on.
    pub fn run_jobs(&self, jobs: &[JobDecl], stack_class: StackClass) -> CounterIndex {
        let counter = self.counters.acquire(jobs.len() as u32, stack_class);
        self.submit(jobs, counter, false);
        counter
    }

    /// Submit `jobs`, auto-freeing the counter back to the pool once the
    /// batch completes (the caller never waits on it).
    pub fn run_jobs_and_free(&self, jobs: &[JobDecl], stack_class: StackClass) {
        let counter = self.counters.acquire(jobs.len() as u32, stack_class);
        self.submit(jobs, counter, true);
    }

    fn submit(&self, jobs: &[JobDecl], counter: CounterIndex, auto_free: bool) {
        for &decl in jobs {
            let internal = InternalJob {
                decl,
                counter,
                auto_free,
            };
            match decl.priority {
                Priority::High => self.queue_high.push(internal),
                Priority::Normal => self.queue_normal.push(internal),
            }
            self.wake_for(decl.pinned);
        }
    }

    fn wake_for(&self, pinned: u32) {
        if pinned != 0 {
            self.workers.semaphores.signal((pinned - 1) as usize);
            return;
        }
        let n = self.workers.num_workers();
        let mut target = self.next_wakeup.fetch_add(1, Ordering::Relaxed) % n;
        if let Some(me) = tls::try_worker_id() {
            if target == me {
                target = self.next_wakeup.fetch_add(1, Ordering::Relaxed) % n;
            }
        }
        self.workers.semaphores.signal(target);
    }

    /// Block the calling (non-scheduler) thread until `counter` reaches
    /// zero, returning it to the free pool once it does. Used only from
    /// outside the scheduler, e.g. the host thread before the engine is
    /// running (§4.4.4).
    pub fn wait_for_counter_os(&self, counter: CounterIndex, poll_interval: std::time::Duration) {
        let slot = self.counters.get(counter);
        while slot.get() != 0 {
            if poll_interval.is_zero() {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(poll_interval);
            }
        }
        self.counters.release(counter);
    }

    /// Suspend the current fiber until `counter` reaches `target`.
    ///
    /// Only valid when called from inside a job running on a scheduler
    /// fiber (not the host thread — use `wait_for_counter_os` there).
    pub fn wait_for_counter(&self, counter: CounterIndex, target: u32) {
        if self.counters.get(counter).get() == target {
            return;
        }
        let class = self.counters.get(counter).stack_class();
        let current = tls::current_fiber();
        let next = self.fibers.acquire(class);
        self.fibers.set_incoming_wait(
            next,
            WaitRecord {
                counter,
                target,
                fiber: current,
            },
        );
        unsafe {
            self.fibers.switch(current, next);
        }
    }

    /// `wait_for_counter` to zero, then return the counter to the pool.
    pub fn wait_for_counter_free(&self, counter: CounterIndex) {
        self.wait_for_counter(counter, 0);
        self.counters.release(counter);
    }

    /// Request shutdown: every worker finishes its current scheduler-loop
    /// iteration, switches back to its root fiber if needed, and returns.
    /// Blocks until all worker threads have joined.
    pub fn shutdown(self: &Arc<Self>) {
        self.workers.request_shutdown();
        self.workers.join();
        CURRENT.store(std::ptr::null_mut(), Ordering::Release);
    }

    fn run_worker(self: &Arc<Self>, worker_index: usize) {
        worker::WorkerPool::mark_started(&self.workers, worker_index);
        self.fibers.convert_thread_to_fiber(worker_index);
        self.scheduler_loop();
    }

    /// The loop body every fiber — root or pooled — runs (§4.4.2).
    ///
    /// `worker`/`current`/`root` are re-read from this OS thread's TLS on
    /// every iteration rather than captured once: a pool fiber's call
    /// frame can be resumed by a different physical thread than the one
    /// that last ran it (a prior iteration may have switched it out to
    /// park on a wait), so any state describing "which physical thread is
    /// this" must be re-derived fresh, the same way `current` already is.
    /// Returns only on the physical thread whose own root fiber this is,
    /// once shutdown has been requested.
    fn scheduler_loop(&self) {
        loop {
            let worker = WorkerIndex(tls::worker_id() as u32);
            let root = tls::root_fiber();
            let current = tls::current_fiber();

            if !self.workers.is_running() {
                if current != root {
                    // Not safe to return from a pooled fiber's stack;
                    // hand control back to this physical thread's own
                    // root fiber, which will observe shutdown on its own
                    // next iteration and actually return.
                    unsafe {
                        self.fibers.switch(current, root);
                    }
                    continue;
                }
                return;
            }

            // Step 0: if whoever switched us in handed off a fiber that
            // gave up its turn, free it now — its registers were saved
            // before control reached us, so this is always safe.
            if let Some(freed) = self.fibers.take_deferred_release(current) {
                self.fibers.release(freed);
            }

            // Step 1: park any wait record this fiber was switched in
            // carrying (attached by whoever called wait_for_counter).
            if let Some(wait) = self.fibers.take_incoming_wait(current) {
                self.wait_queue.push(wait);
            }

            // Step 2: try to resume a parked fiber. Latched true as soon as
            // the pop succeeds at all, ready or not — mirrors the
            // `waiting_fibers` flag the reference scheduler loop threads
            // through its own if/else-if chain, so a record we merely
            // requeued still counts as "there was something to check" and
            // gates step 4's idle wait below.
            let mut touched_wait = false;
            if let Some(w) = self.wait_queue.pop() {
                touched_wait = true;
                let counter_ready = self.counters.get(w.counter).get() == w.target;
                let fiber_pin = self.fibers.pin(w.fiber);
                if counter_ready {
                    if fiber_pin == 0 || fiber_pin == worker.pin_value() {
                        // Root fibers are never pooled: only the physical
                        // thread that owns one may ever resume it again
                        // (see the module doc comment), so only a pool
                        // fiber giving up its turn gets handed off to free.
                        if current != root {
                            self.fibers.defer_release(w.fiber, current);
                        }
                        unsafe {
                            self.fibers.switch(current, w.fiber);
                        }
                        continue;
                    }
                    self.wait_queue.push(w);
                    self.workers.semaphores.signal((fiber_pin - 1) as usize);
                    continue;
                }
                self.wait_queue.push(w);
                if fiber_pin != 0 {
                    self.workers.semaphores.signal((fiber_pin - 1) as usize);
                }
            }

            // Step 3: high-priority queue, then normal. A pin-mismatched
            // pop that gets requeued still consumes that queue's turn for
            // this iteration (it was found, just not ours to run), so only
            // `Empty` falls through to try the next queue.
            match self.try_run_one(&self.queue_high, current, worker) {
                PopOutcome::Ran => continue,
                PopOutcome::Requeued => continue,
                PopOutcome::Empty => {}
            }
            match self.try_run_one(&self.queue_normal, current, worker) {
                PopOutcome::Ran => continue,
                PopOutcome::Requeued => continue,
                PopOutcome::Empty => {}
            }

            // Step 4: idle, unless step 2 touched a wait record this
            // iteration — parking here would risk missing the wakeup for a
            // counter that becomes ready while every worker is mid-idle-
            // transition, since nothing else re-signals on counter
            // progress. Loop back and re-check instead of sleeping.
            if !touched_wait {
                self.workers.semaphores.wait(worker.as_usize());
            }
        }
    }

    fn try_run_one(&self, queue: &MpmcQueue<InternalJob>, current: FiberIndex, worker: WorkerIndex) -> PopOutcome {
        let job = match queue.pop() {
            Some(j) => j,
            None => return PopOutcome::Empty,
        };
        if job.decl.pinned != 0 && job.decl.pinned != worker.pin_value() {
            queue.push(job);
            self.workers.semaphores.signal((job.decl.pinned - 1) as usize);
            return PopOutcome::Requeued;
        }

        self.fibers.set_pin(current, job.decl.pinned);
        // Safety: `data` and `task` are whatever the submitter set them
        // up to be; the job contract requires they remain valid for the
        // duration of the run.
        unsafe {
            (job.decl.task)(job.decl.data);
        }
        self.fibers.set_pin(current, 0);

        let remaining = self.counters.get(job.counter).decrement();
        if job.auto_free && remaining == 0 {
            self.counters.release(job.counter);
        }
        PopOutcome::Ran
    }
}

/// Fetch the process-default job system: a thin convenience over the
/// explicit `Arc<JobSystem>` handle `start` returns, for call sites (like
/// the fiber entry trampoline, and the `forge` facade's free functions)
/// that have no way to carry that handle through.
///
/// Panics if no job system is currently running.
pub fn default_handle() -> &'static JobSystem {
    let ptr = CURRENT.load(Ordering::Acquire);
    assert!(!ptr.is_null(), "job system not running");
    unsafe { &*ptr }
}

extern "C" fn fiber_entry_trampoline(_arg: usize) {
    default_handle().scheduler_loop();
}

const _: FiberEntry = fiber_entry_trampoline;
