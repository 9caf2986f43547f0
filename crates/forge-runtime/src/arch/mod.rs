//! Architecture-specific fiber context switching.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64 as current;
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64 as current;
    } else {
        compile_error!("unsupported architecture");
    }
}

pub use current::SavedRegs;
