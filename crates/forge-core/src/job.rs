//! Job declaration and priority.

use crate::ids::CounterIndex;

/// Job priority. Strictly two levels — high-priority jobs are always
/// drained before normal-priority ones on every scheduler iteration;
/// there is no work-stealing between the two queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Normal,
    High,
}

/// Stack-size class requested for the fiber(s) a job batch may need if one
/// of its jobs calls `wait_for_counter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackClass {
    /// The common case: fibers backed by the configured normal stack size.
    Normal,
    /// Reserved pool of `EXTENDED_FIBER_COUNT` fibers with a larger stack,
    /// for jobs expected to recurse through several nested waits.
    Extended,
}

/// Opaque unit-of-work reference: a function pointer plus an untyped data
/// pointer, matching the external job declaration contract (§6). The
/// ergonomic, closure-based API lives in the `forge` facade crate; this is
/// the low-level shape the job system itself queues and dispatches.
pub type JobFn = unsafe extern "C" fn(*mut u8);

/// A job as submitted by the caller.
#[derive(Clone, Copy)]
pub struct JobDecl {
    pub task: JobFn,
    pub data: *mut u8,
    pub priority: Priority,
    /// 0 = unpinned; nonzero = must run on the worker whose
    /// `get_pin_index` equals this value.
    pub pinned: u32,
}

// Safety: `data` is treated as an opaque payload moved between threads by
// the scheduler, never dereferenced concurrently; the caller that builds a
// `JobDecl` is responsible for `task`'s safety contract.
unsafe impl Send for JobDecl {}

/// The scheduler's internal wrapping of a submitted job: adds the counter
/// it decrements on completion and whether that counter auto-frees at
/// zero.
#[derive(Clone, Copy)]
pub struct InternalJob {
    pub decl: JobDecl,
    pub counter: CounterIndex,
    pub auto_free: bool,
}

unsafe impl Send for InternalJob {}
