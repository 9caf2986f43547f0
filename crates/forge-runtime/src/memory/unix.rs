//! Unix stack allocation via `mmap`/`mprotect`.

use forge_core::error::MemoryError;

const GUARD_SIZE: usize = 4096;

/// An `mmap`-backed fiber stack with a trailing guard page.
///
/// Layout: `[ usable stack (size) | guard page (PROT_NONE) ]`. The stack
/// grows down from `top()`, away from the guard page.
pub struct FiberStack {
    base: *mut u8,
    mapped_size: usize,
    usable_size: usize,
}

// Safety: a `FiberStack` is only ever touched by the single fiber that
// owns it, or during its own construction/destruction.
unsafe impl Send for FiberStack {}

impl FiberStack {
    /// Map a new stack of `size` usable bytes, rounded up to the page size,
    /// plus a trailing guard page.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        let page_size = page_size();
        let usable_size = round_up(size, page_size);
        let mapped_size = usable_size + GUARD_SIZE;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        let base = base as *mut u8;
        let guard_base = unsafe { base.add(usable_size) };
        let ret = unsafe { libc::mprotect(guard_base as *mut libc::c_void, GUARD_SIZE, libc::PROT_NONE) };
        if ret != 0 {
            unsafe {
                libc::munmap(base as *mut libc::c_void, mapped_size);
            }
            return Err(MemoryError::ProtectionFailed);
        }

        Ok(Self {
            base,
            mapped_size,
            usable_size,
        })
    }

    /// Top of the usable stack region (stacks grow down from here).
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.usable_size) }
    }

    /// Release the physical pages backing this stack back to the kernel
    /// without unmapping the virtual address range. Called when a fiber is
    /// returned to the free pool, so idle fibers don't pin resident memory.
    pub fn advise_unused(&self) -> Result<(), MemoryError> {
        let ret = unsafe {
            libc::madvise(
                self.base as *mut libc::c_void,
                self.usable_size,
                libc::MADV_DONTNEED,
            )
        };
        if ret != 0 {
            return Err(MemoryError::AdviseFailed);
        }
        Ok(())
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.mapped_size);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_top_is_usable_size_above_base() {
        let stack = FiberStack::new(64 * 1024).unwrap();
        let top = stack.top();
        assert!(!top.is_null());
        assert!(top as usize > stack.base as usize);
    }

    #[test]
    fn rounds_size_up_to_page_size() {
        let stack = FiberStack::new(1).unwrap();
        assert!(stack.usable_size >= page_size());
        assert_eq!(stack.usable_size % page_size(), 0);
    }
}
