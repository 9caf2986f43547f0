//! # forge-core
//!
//! Platform-agnostic types for the forge fiber scheduler and memory tracker.
//!
//! All OS-specific code (mmap, context switching, thread spawning) lives in
//! `forge-runtime`; this crate only knows about indices, atomics, and the
//! data structures built on top of them.
//!
//! ## Modules
//!
//! - `ids` - small index newtypes (fiber, context, counter)
//! - `mpmc` - bounded lock-free MPMC queue (Vyukov)
//! - `job` - job declaration and priority
//! - `counter` - job counter pool
//! - `allocator` - uniform realloc-style allocator trait + system allocator
//! - `tracker` - hierarchical memory tracker
//! - `registry` - name -> interface table
//! - `error` - error types
//! - `kprint` - leveled, thread-tagged logging macros
//! - `env` - environment variable utilities

#![allow(clippy::missing_safety_doc)]

pub mod ids;
pub mod mpmc;
pub mod job;
pub mod counter;
pub mod allocator;
pub mod tracker;
pub mod registry;
pub mod error;
pub mod kprint;
pub mod env;

pub use ids::{FiberIndex, ContextId, CounterIndex, WorkerIndex};
pub use mpmc::MpmcQueue;
pub use job::{JobDecl, Priority, StackClass};
pub use counter::{JobCounter, CounterPool};
pub use allocator::{Allocator, CallSite, SystemAllocator};
pub use tracker::{MemoryTracker, ContextSnapshot, TraceSnapshot};
pub use registry::Registry;
pub use error::{ForgeError, ForgeResult, JobError, MemoryError};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Compile-time layout constants shared by core and runtime.
pub mod constants {
    /// Cache line size used for padding to avoid false sharing.
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Minimum alignment the system allocator guarantees, matching the
    /// "align to max(align, MIN_ALIGN)" contract of the allocator interface.
    pub const MIN_ALIGN: usize = 16;

    /// Number of extended-stack fibers created at startup, regardless of
    /// the total fiber count requested.
    pub const EXTENDED_FIBER_COUNT: usize = 8;

    /// Maximum worker threads supported (bounds static arrays keyed by
    /// worker index, e.g. semaphores and scheduler-context save areas).
    pub const MAX_WORKERS: usize = 64;
}
