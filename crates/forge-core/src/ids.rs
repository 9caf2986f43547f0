//! Small index newtypes used throughout the scheduler.
//!
//! `FiberIndex` and `ContextId` carry a `NONE` sentinel, matching places
//! where "no fiber"/"no context" is a meaningful value. `CounterIndex`
//! deliberately does not: the free-counter queue is seeded with every
//! valid index including 0, and exhaustion is only ever observed through
//! `MpmcQueue::pop` returning `false` (see the tracker/job-system Open
//! Questions in the project's design notes).

use core::fmt;

/// Index of a fiber in the fiber pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberIndex(u32);

impl FiberIndex {
    /// Sentinel meaning "no fiber".
    pub const NONE: FiberIndex = FiberIndex(u32::MAX);

    #[inline]
    pub const fn new(v: u32) -> Self {
        FiberIndex(v)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }
}

impl Default for FiberIndex {
    fn default() -> Self {
        FiberIndex::NONE
    }
}

impl fmt::Debug for FiberIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberIndex(none)")
        } else {
            write!(f, "FiberIndex({})", self.0)
        }
    }
}

impl fmt::Display for FiberIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Index of a worker OS thread, `0..num_workers`.
///
/// Doubles as the "pin value" described in the job/fiber pinning contract:
/// pin `0` means unpinned, pin `i+1` means "must run on worker `i`"
/// (`get_pin_index(i)` below returns `i + 1` so that `0` stays free for
/// "unpinned").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct WorkerIndex(pub u32);

impl WorkerIndex {
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The pin value that refers to this worker (never 0, which means
    /// "unpinned").
    #[inline]
    pub const fn pin_value(self) -> u32 {
        self.0 + 1
    }
}

/// Index into the memory tracker's context table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ContextId(u32);

impl ContextId {
    /// Sentinel disabling recording entirely (used by the tracker's own
    /// internal allocations to break reentrancy).
    pub const NONE: ContextId = ContextId(u32::MAX);

    /// The root context, always present after the tracker is created.
    pub const ROOT: ContextId = ContextId(0);

    #[inline]
    pub const fn new(v: u32) -> Self {
        ContextId(v)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for ContextId {
    fn default() -> Self {
        ContextId::NONE
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ContextId(none)")
        } else {
            write!(f, "ContextId({})", self.0)
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Index into the counter pool.
///
/// No sentinel value on purpose: see the module doc comment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct CounterIndex(pub u32);

impl CounterIndex {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CounterIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fiber_index_none() {
        assert!(FiberIndex::NONE.is_none());
        assert!(FiberIndex::new(3).is_some());
    }

    #[test]
    fn context_id_root_and_none() {
        assert_eq!(ContextId::ROOT.as_u32(), 0);
        assert!(ContextId::NONE.is_none());
    }

    #[test]
    fn worker_pin_value_never_zero() {
        let w = WorkerIndex(0);
        assert_eq!(w.pin_value(), 1);
        assert_ne!(w.pin_value(), 0);
    }

    #[test]
    fn counter_index_has_no_sentinel() {
        // 0 is a perfectly valid counter index.
        let c = CounterIndex(0);
        assert_eq!(c.as_u32(), 0);
    }
}
