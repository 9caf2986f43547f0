//! # forge
//!
//! Ergonomic entry point over `forge-core` and `forge-runtime`: a `Runtime`
//! that brings up a tracker-rooted allocator and the job system together,
//! plus closure-based job submission (the low-level crates only deal in
//! raw `JobDecl { task: extern "C" fn(*mut u8), data: *mut u8 }` pairs).
//!
//! Mirrors the reference engine's bring-up order: create an allocator
//! rooted in a tracker context, start the job system, submit work, wait,
//! shut down.

pub use forge_core::allocator::{Allocator, CallSite, SystemAllocator};
pub use forge_core::counter::JobCounter;
pub use forge_core::error::{ForgeError, ForgeResult, JobError, MemoryError};
pub use forge_core::ids::{ContextId, CounterIndex, FiberIndex, WorkerIndex};
pub use forge_core::job::{JobDecl, Priority, StackClass};
pub use forge_core::registry::Registry;
pub use forge_core::tracker::{ContextSnapshot, MemoryTracker, TraceSnapshot};
pub use forge_core::{env, log_debug, log_error, log_info, log_print, log_println, log_trace, log_warn};

pub use forge_runtime::{ConfigError, JobSystem, JobSystemDesc};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Brings up every ambient piece a job-system-using program needs: a
/// memory tracker with a root context for the application, a
/// `SystemAllocator` over it, and the job system itself.
pub struct Runtime {
    system: Arc<JobSystem>,
    tracker: Arc<MemoryTracker>,
    context: ContextId,
    allocator: SystemAllocator,
    shut_down: AtomicBool,
}

impl Runtime {
    /// Start the runtime: create the tracker and its application context,
    /// then bring up the job system per `desc`.
    pub fn start(desc: JobSystemDesc) -> Result<Self, ForgeError> {
        let tracker = Arc::new(MemoryTracker::new());
        let context = tracker.create_context("app", ContextId::ROOT);
        let allocator = SystemAllocator::new(Arc::clone(&tracker), context);
        let system = JobSystem::start(desc)?;
        Ok(Self {
            system,
            tracker,
            context,
            allocator,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start with `JobSystemDesc::default()`.
    pub fn start_default() -> Result<Self, ForgeError> {
        Self::start(JobSystemDesc::default())
    }

    /// The application's root allocator, rooted at a tracker context
    /// separate from the tracker's own internal bookkeeping context.
    pub fn allocator(&self) -> &SystemAllocator {
        &self.allocator
    }

    /// The tracker backing `allocator`, for snapshotting or creating
    /// further child contexts.
    pub fn tracker(&self) -> &Arc<MemoryTracker> {
        &self.tracker
    }

    /// The underlying job system handle, for callers that want the raw
    /// `JobDecl`-based API directly.
    pub fn job_system(&self) -> &Arc<JobSystem> {
        &self.system
    }

    pub fn worker_count(&self) -> usize {
        self.system.worker_count()
    }

    pub fn get_pin_index(&self, i: usize) -> u32 {
        self.system.get_pin_index(i)
    }

    pub fn run_jobs(&self, jobs: &[JobDecl], stack_class: StackClass) -> CounterIndex {
        self.system.run_jobs(jobs, stack_class)
    }

    pub fn run_jobs_and_free(&self, jobs: &[JobDecl], stack_class: StackClass) {
        self.system.run_jobs_and_free(jobs, stack_class)
    }

    /// Block the calling (non-fiber) thread until `counter` is free.
    /// Only valid from outside the scheduler, e.g. the host thread that
    /// owns this `Runtime`.
    pub fn wait_for_counter_os(&self, counter: CounterIndex, poll_interval: Duration) {
        self.system.wait_for_counter_os(counter, poll_interval);
    }

    /// Destroy the application context (reporting any leaked bytes), run
    /// one final leak sweep, and stop the job system. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tracker.destroy_context(self.context);
        let leaks = self.tracker.check_for_leaks();
        if leaks > 0 {
            log_warn!("runtime shutdown with {leaks} leaking tracker context(s)");
        }
        self.system.shutdown();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wrap a closure as a raw, unpinned `JobDecl` at the given priority.
///
/// The closure is boxed and the box's raw pointer becomes the job's opaque
/// `data`; the monomorphized trampoline below reconstructs and calls it
/// exactly once, when the scheduler runs the job.
pub fn job<F: FnOnce() + Send + 'static>(f: F, priority: Priority) -> JobDecl {
    job_pinned(f, priority, 0)
}

/// Like `job`, but pinned to the worker whose `get_pin_index` equals
/// `pinned` (0 = unpinned).
pub fn job_pinned<F: FnOnce() + Send + 'static>(f: F, priority: Priority, pinned: u32) -> JobDecl {
    unsafe extern "C" fn trampoline<F: FnOnce() + Send + 'static>(data: *mut u8) {
        let boxed = unsafe { Box::from_raw(data as *mut F) };
        boxed();
    }
    let data = Box::into_raw(Box::new(f)) as *mut u8;
    JobDecl {
        task: trampoline::<F>,
        data,
        priority,
        pinned,
    }
}

/// Submit `jobs` against the process-default job system, returning the
/// counter to wait on.
pub fn run_jobs(jobs: &[JobDecl], stack_class: StackClass) -> CounterIndex {
    forge_runtime::job_system::default_handle().run_jobs(jobs, stack_class)
}

/// Submit `jobs`, auto-freeing the counter once the batch completes.
pub fn run_jobs_and_free(jobs: &[JobDecl], stack_class: StackClass) {
    forge_runtime::job_system::default_handle().run_jobs_and_free(jobs, stack_class)
}

/// Suspend the calling fiber until `counter` reaches `target`. Only valid
/// from inside a running job.
pub fn wait_for_counter(counter: CounterIndex, target: u32) {
    forge_runtime::job_system::default_handle().wait_for_counter(counter, target)
}

/// `wait_for_counter` to zero, then free the counter.
pub fn wait_for_counter_free(counter: CounterIndex) {
    forge_runtime::job_system::default_handle().wait_for_counter_free(counter)
}

/// The pin value identifying worker `i` (`i` in `[0, worker_count)`).
pub fn get_pin_index(i: usize) -> u32 {
    forge_runtime::job_system::default_handle().get_pin_index(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn small_desc() -> JobSystemDesc {
        JobSystemDesc {
            worker_count: 2,
            fiber_count: 16,
            ..JobSystemDesc::default()
        }
    }

    #[test]
    fn runtime_starts_and_shuts_down() {
        let rt = Runtime::start(small_desc()).unwrap();
        assert_eq!(rt.worker_count(), 2);
        rt.shutdown();
    }

    #[test]
    fn fan_out_fan_in_via_closures() {
        let rt = Runtime::start(small_desc()).unwrap();
        let total = Arc::new(AtomicU32::new(0));
        let jobs: Vec<JobDecl> = (0..32u32)
            .map(|i| {
                let total = Arc::clone(&total);
                job(
                    move || {
                        total.fetch_add(i, Ordering::Relaxed);
                    },
                    Priority::Normal,
                )
            })
            .collect();
        let counter = rt.run_jobs(&jobs, StackClass::Normal);
        rt.wait_for_counter_os(counter, Duration::from_micros(50));
        assert_eq!(total.load(Ordering::Relaxed), (0..32u32).sum());
        rt.shutdown();
    }

    #[test]
    fn double_shutdown_is_harmless() {
        let rt = Runtime::start(small_desc()).unwrap();
        rt.shutdown();
        rt.shutdown();
    }
}
