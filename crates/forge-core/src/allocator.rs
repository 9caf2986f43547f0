//! Uniform `realloc`-style allocator contract.
//!
//! A single operation expresses allocate (`old_ptr` null), free (`new_size`
//! zero), and resize (both non-null/non-zero). Every non-null result
//! carries a hidden header recording its size, so `free`/resize never need
//! the caller to remember the old size. Every call — regardless of
//! outcome — reports its (old_size, new_size) delta to the memory tracker
//! against the allocator's context.

use crate::ids::ContextId;
use crate::tracker::MemoryTracker;
use std::alloc::{self, Layout};
use std::panic::Location;
use std::sync::Arc;

/// Minimum alignment the system allocator guarantees.
pub const MIN_ALIGN: usize = crate::constants::MIN_ALIGN;

/// Call-site metadata captured at the allocate/free/resize call, mirroring
/// `__FILE__`/`__LINE__`/`__FUNCTION__` in the source this is grounded on.
/// Rust's `#[track_caller]` plus `Location::caller()` gives the same
/// information without a macro.
#[derive(Debug, Clone, Copy)]
pub struct CallSite {
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    #[track_caller]
    pub fn here(function: &'static str) -> Self {
        let loc = Location::caller();
        CallSite {
            function,
            file: loc.file(),
            line: loc.line(),
        }
    }
}

/// A hidden header stored immediately before every allocation, so `free`
/// and `resize` can recover `old_size` without the caller passing it.
#[repr(C)]
struct Header {
    size: usize,
    align: usize,
}

const HEADER_LAYOUT_ALIGN: usize = MIN_ALIGN;

// The header always sits at a fixed offset before the user pointer, one
// `HEADER_LAYOUT_ALIGN`-aligned slot. Callers requesting a stricter
// alignment than `MIN_ALIGN` are clamped to `MIN_ALIGN` (see `realloc`
// below): supporting arbitrary over-alignment would need the offset
// itself recorded out-of-band, which the jobs/contexts this allocator
// actually serves never require.
fn header_offset(_align: usize) -> usize {
    (std::mem::size_of::<Header>() + HEADER_LAYOUT_ALIGN - 1) & !(HEADER_LAYOUT_ALIGN - 1)
}

fn full_layout(size: usize, align: usize) -> (Layout, usize) {
    let align = align.max(MIN_ALIGN);
    let offset = header_offset(align);
    let layout = Layout::from_size_align(offset + size, align).expect("invalid layout");
    (layout, offset)
}

unsafe fn header_of(ptr: *mut u8) -> *mut Header {
    let offset = header_offset(MIN_ALIGN);
    ptr.sub(offset) as *mut Header
}

/// The allocator contract itself: one method, three meanings.
pub trait Allocator: Send + Sync {
    /// `old_ptr` null + `new_size > 0` => allocate.
    /// `old_ptr` non-null + `new_size == 0` => free, returns null.
    /// `old_ptr` non-null + `new_size > 0` => resize (grow copies, shrink is a no-op).
    ///
    /// # Safety
    ///
    /// `old_ptr`, if non-null, must have been returned by a previous call
    /// to this same allocator and not already freed.
    unsafe fn realloc(
        &self,
        old_ptr: *mut u8,
        new_size: usize,
        align: usize,
        site: CallSite,
    ) -> *mut u8;

    /// The tracker context this allocator's operations are billed against.
    fn context(&self) -> ContextId;
}

/// Allocate through `a`, capturing the caller's location.
#[track_caller]
pub fn alloc(a: &dyn Allocator, size: usize) -> *mut u8 {
    let site = CallSite::here("alloc");
    unsafe { a.realloc(std::ptr::null_mut(), size, 0, site) }
}

/// Free through `a`.
#[track_caller]
pub fn free(a: &dyn Allocator, ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let site = CallSite::here("free");
    unsafe {
        a.realloc(ptr, 0, 0, site);
    }
}

/// Resize through `a`.
#[track_caller]
pub fn realloc(a: &dyn Allocator, ptr: *mut u8, new_size: usize) -> *mut u8 {
    let site = CallSite::here("realloc");
    unsafe { a.realloc(ptr, new_size, 0, site) }
}

/// The system allocator: backs allocations with `std::alloc` directly and
/// reports every call to a `MemoryTracker` context.
pub struct SystemAllocator {
    tracker: Arc<MemoryTracker>,
    context: ContextId,
}

impl SystemAllocator {
    /// Build a system allocator rooted at `context` inside `tracker`.
    pub fn new(tracker: Arc<MemoryTracker>, context: ContextId) -> Self {
        Self { tracker, context }
    }

    /// Create a child allocator with a fresh context under this one's.
    pub fn create_child(&self, name: &str) -> SystemAllocator {
        let child_ctx = self.tracker.create_context(name, self.context);
        SystemAllocator {
            tracker: Arc::clone(&self.tracker),
            context: child_ctx,
        }
    }

    /// Destroy a child allocator's context; any residual bytes are
    /// reported as a leak by the tracker.
    pub fn destroy_child(&self, child: SystemAllocator) {
        self.tracker.destroy_context(child.context);
    }
}

impl Allocator for SystemAllocator {
    unsafe fn realloc(
        &self,
        old_ptr: *mut u8,
        new_size: usize,
        _align: usize,
        site: CallSite,
    ) -> *mut u8 {
        // Alignment requests beyond MIN_ALIGN are clamped; see the note on
        // `header_offset` above.
        let align = MIN_ALIGN;

        if old_ptr.is_null() {
            if new_size == 0 {
                self.tracker
                    .record(std::ptr::null_mut(), 0, std::ptr::null_mut(), 0, site, self.context);
                return std::ptr::null_mut();
            }
            let (layout, offset) = full_layout(new_size, align);
            let raw = alloc::alloc(layout);
            if raw.is_null() {
                self.tracker
                    .record(std::ptr::null_mut(), 0, std::ptr::null_mut(), 0, site, self.context);
                return std::ptr::null_mut();
            }
            let user_ptr = raw.add(offset);
            (*(header_of(user_ptr))) = Header {
                size: new_size,
                align,
            };
            self.tracker
                .record(std::ptr::null_mut(), 0, user_ptr, new_size, site, self.context);
            return user_ptr;
        }

        let header = &*header_of(old_ptr);
        let old_size = header.size;
        let old_align = header.align;

        if new_size == 0 {
            let (layout, offset) = full_layout(old_size, old_align);
            let raw = old_ptr.sub(offset);
            alloc::dealloc(raw, layout);
            self.tracker
                .record(old_ptr, old_size, std::ptr::null_mut(), 0, site, self.context);
            return std::ptr::null_mut();
        }

        if new_size <= old_size {
            // Shrink is a no-op: the header still reports the original
            // size, matching the reference contract exactly.
            self.tracker
                .record(old_ptr, old_size, old_ptr, old_size, site, self.context);
            return old_ptr;
        }

        // Grow: allocate new, copy, free old.
        let new_ptr = self.realloc(std::ptr::null_mut(), new_size, old_align, site);
        if !new_ptr.is_null() {
            std::ptr::copy_nonoverlapping(old_ptr, new_ptr, old_size);
            let (layout, offset) = full_layout(old_size, old_align);
            let raw = old_ptr.sub(offset);
            alloc::dealloc(raw, layout);
        }
        self.tracker
            .record(old_ptr, old_size, new_ptr, new_size, site, self.context);
        new_ptr
    }

    fn context(&self) -> ContextId {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::MemoryTracker;

    fn fresh() -> SystemAllocator {
        let tracker = Arc::new(MemoryTracker::new());
        let ctx = tracker.create_context("test", ContextId::ROOT);
        SystemAllocator::new(tracker, ctx)
    }

    #[test]
    fn allocate_then_free_zeroes_tracker() {
        let a = fresh();
        let p = alloc(&a, 64);
        assert!(!p.is_null());
        assert_eq!(a.tracker.snapshot_context(a.context()).unwrap().amount_allocated, 64);
        free(&a, p);
        assert_eq!(a.tracker.snapshot_context(a.context()).unwrap().amount_allocated, 0);
    }

    #[test]
    fn grow_preserves_contents() {
        let a = fresh();
        let p = alloc(&a, 8);
        unsafe {
            std::ptr::write_bytes(p, 0xAB, 8);
        }
        let p2 = realloc(&a, p, 64);
        assert!(!p2.is_null());
        unsafe {
            assert_eq!(*p2, 0xAB);
        }
        free(&a, p2);
    }

    #[test]
    fn shrink_is_noop_and_idempotent_for_tracker() {
        let a = fresh();
        let p = alloc(&a, 64);
        let p2 = realloc(&a, p, 8);
        assert_eq!(p, p2);
        // Tracker still reports the original 64 bytes (shrink is a no-op).
        assert_eq!(a.tracker.snapshot_context(a.context()).unwrap().amount_allocated, 64);
        free(&a, p2);
    }

    #[test]
    fn child_allocator_cleanup_leaves_parent_untouched() {
        let a = fresh();
        let child = a.create_child("child");
        let p = alloc(&child, 32);
        free(&child, p);
        let before = a.tracker.snapshot_context(a.context()).unwrap().amount_allocated;
        a.destroy_child(child);
        let after = a.tracker.snapshot_context(a.context()).unwrap().amount_allocated;
        assert_eq!(before, after);
    }
}
