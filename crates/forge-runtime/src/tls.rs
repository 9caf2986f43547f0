//! Thread-local state: which worker and which fiber this OS thread is
//! currently running.

use forge_core::FiberIndex;
use std::cell::Cell;

thread_local! {
    static WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };
    static CURRENT_FIBER: Cell<FiberIndex> = const { Cell::new(FiberIndex::NONE) };
    static ROOT_FIBER: Cell<FiberIndex> = const { Cell::new(FiberIndex::NONE) };
}

#[inline]
pub fn set_worker_id(id: usize) {
    WORKER_ID.with(|c| c.set(id));
    forge_core::kprint::set_worker_id(id as u32);
}

#[inline]
pub fn worker_id() -> usize {
    WORKER_ID.with(|c| c.get())
}

#[inline]
pub fn try_worker_id() -> Option<usize> {
    let id = worker_id();
    if id == usize::MAX {
        None
    } else {
        Some(id)
    }
}

#[inline]
pub fn set_current_fiber(id: FiberIndex) {
    CURRENT_FIBER.with(|c| c.set(id));
    forge_core::kprint::set_fiber_id(id.as_u32());
}

#[inline]
pub fn current_fiber() -> FiberIndex {
    CURRENT_FIBER.with(|c| c.get())
}

/// Record this worker's root fiber (the one its OS thread was converted
/// into at startup), so the scheduler loop can tell when it's safe to
/// convert back and return.
#[inline]
pub fn set_root_fiber(id: FiberIndex) {
    ROOT_FIBER.with(|c| c.set(id));
}

#[inline]
pub fn root_fiber() -> FiberIndex {
    ROOT_FIBER.with(|c| c.get())
}

#[inline]
pub fn is_on_root_fiber() -> bool {
    current_fiber() == root_fiber()
}
