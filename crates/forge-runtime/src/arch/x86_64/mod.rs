//! x86_64 context switching.
//!
//! Uses `naked_asm`, stable since Rust 1.88.

use std::arch::naked_asm;

/// Callee-saved registers preserved across a voluntary fiber switch, plus
/// the stack pointer and return address. Matches the System V AMD64 ABI's
/// callee-saved set.
#[repr(C)]
#[derive(Default)]
pub struct SavedRegs {
    pub rsp: u64,
    pub rip: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// Set up a fresh fiber's initial register state so that switching to it
/// for the first time begins execution at `entry_fn(entry_arg)`.
///
/// # Safety
///
/// `stack_top` must be a valid, writable stack pointer for this fiber's
/// guarded stack region.
#[inline]
pub unsafe fn init_context(regs: *mut SavedRegs, stack_top: *mut u8, entry_fn: usize, entry_arg: usize) {
    let sp = stack_top as usize;
    // Align to 16 bytes per the ABI, then leave room for the trampoline's
    // implicit return address slot.
    let aligned_sp = (sp & !0xF) - 8;

    let regs = &mut *regs;
    regs.rsp = aligned_sp as u64;
    regs.rip = fiber_entry_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0;
    regs.r12 = entry_fn as u64;
    regs.r13 = entry_arg as u64;
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Trampoline: calls the fiber's entry function with its argument, then
/// hands off to the fiber-finished hook. Never returns.
#[unsafe(naked)]
pub unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {finished}",
        "ud2",
        finished = sym crate::fiber::fiber_finished,
    );
}

/// Voluntary context switch: save callee-saved registers to `old_regs`,
/// load them from `new_regs`, jump to `new_regs.rip`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old_regs: *mut SavedRegs, _new_regs: *const SavedRegs) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        "1:",
        "ret",
    );
}
