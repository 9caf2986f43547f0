//! Guarded stack allocation for fibers.
//!
//! Each fiber stack is its own `mmap` region with a guard page at the end
//! (stacks grow down), so a stack overflow faults immediately instead of
//! silently corrupting the next fiber's stack.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::FiberStack;
    } else {
        compile_error!("forge-runtime currently only supports unix targets");
    }
}
