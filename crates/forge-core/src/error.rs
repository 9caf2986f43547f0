//! Error types for the fiber scheduler and memory subsystem.

use core::fmt;

/// Result type for runtime operations.
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Top-level error type returned by `forge` and `forge-runtime` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForgeError {
    /// Job-system related error.
    Job(JobError),

    /// Memory subsystem error.
    Memory(MemoryError),

    /// Platform-specific error, carrying the raw `errno`.
    Platform(i32),
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForgeError::Job(e) => write!(f, "job system error: {e}"),
            ForgeError::Memory(e) => write!(f, "memory error: {e}"),
            ForgeError::Platform(code) => write!(f, "platform error: {code}"),
        }
    }
}

impl std::error::Error for ForgeError {}

/// Errors raised by the job system (C7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// A call was made (e.g. `run_jobs`) after the job system finished
    /// starting up but before workers were running, or after shutdown.
    NotRunning,

    /// A job declared `StackClass::Extended` but no extended-stack fiber
    /// exists to run it (the pool reserves a small fixed count).
    InvalidStackClass,

    /// `shutdown` was called while a shutdown was already in progress.
    ShutdownInProgress,

    /// The job system failed to start: an invalid `JobSystemDesc`, or a
    /// failure building the fiber pool's stacks.
    Startup(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::NotRunning => write!(f, "job system is not running"),
            JobError::InvalidStackClass => write!(f, "no fiber available for requested stack class"),
            JobError::ShutdownInProgress => write!(f, "shutdown already in progress"),
            JobError::Startup(reason) => write!(f, "job system failed to start: {reason}"),
        }
    }
}

impl From<JobError> for ForgeError {
    fn from(e: JobError) -> Self {
        ForgeError::Job(e)
    }
}

/// Memory-related errors (C4/C5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// `mmap` (or equivalent) failed.
    AllocationFailed,

    /// `mprotect` failed while setting up a guard page.
    ProtectionFailed,

    /// `madvise` failed.
    AdviseFailed,

    /// The tracker's fixed context table is full.
    TooManySlots,

    /// Operation referenced a context id that doesn't exist or was
    /// already destroyed.
    InvalidContext,

    /// Operation referenced a call-site id that doesn't exist.
    InvalidSite,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::AdviseFailed => write!(f, "madvise failed"),
            MemoryError::TooManySlots => write!(f, "too many tracker contexts requested"),
            MemoryError::InvalidContext => write!(f, "invalid or destroyed context"),
            MemoryError::InvalidSite => write!(f, "invalid call site"),
        }
    }
}

impl From<MemoryError> for ForgeError {
    fn from(e: MemoryError) -> Self {
        ForgeError::Memory(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wraps_inner_error() {
        let e: ForgeError = MemoryError::AllocationFailed.into();
        assert_eq!(format!("{e}"), "memory error: memory allocation failed");
    }

    #[test]
    fn job_error_conversion() {
        let e: ForgeError = JobError::NotRunning.into();
        assert!(matches!(e, ForgeError::Job(JobError::NotRunning)));
    }

    #[test]
    fn platform_error_displays_code() {
        let e = ForgeError::Platform(22);
        assert_eq!(format!("{e}"), "platform error: 22");
    }
}
