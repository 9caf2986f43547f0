//! OS thread/fiber abstraction (C6): worker threads, stackful fibers, and
//! the low-level voluntary context switch between them.
//!
//! A fiber is either a **root fiber** (an OS thread converted in place,
//! running on that thread's own stack) or a **pool fiber** (its own
//! `mmap`-backed guarded stack, pre-armed to start at the scheduler loop's
//! entry trampoline). Both kinds are switched between identically: saving
//! callee-saved registers into the outgoing fiber's slot and loading them
//! from the incoming one.
//!
//! Exactly one OS thread executes a given fiber's instructions at any
//! instant, and a fiber untouched by its own thread is never touched by
//! another except through the queues in `forge_core::mpmc` — so the
//! per-fiber state below needs no atomics.

use crate::arch::{self, SavedRegs};
use crate::memory::FiberStack;
use crate::tls;
use forge_core::error::MemoryError;
use forge_core::ids::{CounterIndex, FiberIndex};
use forge_core::job::StackClass;
use forge_core::mpmc::MpmcQueue;
use std::cell::{Cell, UnsafeCell};

/// A fiber's attachment describing the thing it's waiting on, written by
/// the switcher into the *destination* fiber's slot and read exactly once
/// by that fiber when it next runs its scheduler-loop iteration.
#[derive(Clone, Copy)]
pub struct WaitRecord {
    pub counter: CounterIndex,
    pub target: u32,
    pub fiber: FiberIndex,
}

struct Fiber {
    regs: UnsafeCell<SavedRegs>,
    stack: Option<FiberStack>,
    stack_class: Cell<StackClass>,
    /// Pin value (0 = unpinned) inherited from the job currently running
    /// on this fiber, consulted by the scheduler loop before running a
    /// popped job to decide whether this worker may run it.
    pin: Cell<u32>,
    incoming_wait: Cell<Option<WaitRecord>>,
    /// Set on the fiber being switched *into*, naming a fiber that gave up
    /// its turn to let this one run and should be returned to the free
    /// pool. Consumed by the scheduler loop's first action after resuming,
    /// which is always safe because the outgoing fiber's registers are
    /// saved before `context_switch` jumps here (see `FiberPool::switch`).
    release_on_resume: Cell<Option<FiberIndex>>,
}

// Safety: see module doc comment — a `Fiber` is single-writer at any time.
unsafe impl Sync for Fiber {}

impl Fiber {
    fn root() -> Self {
        Self {
            regs: UnsafeCell::new(SavedRegs::default()),
            stack: None,
            stack_class: Cell::new(StackClass::Normal),
            pin: Cell::new(0),
            incoming_wait: Cell::new(None),
            release_on_resume: Cell::new(None),
        }
    }

    fn pooled(stack: FiberStack, stack_class: StackClass) -> Self {
        Self {
            regs: UnsafeCell::new(SavedRegs::default()),
            stack: Some(stack),
            stack_class: Cell::new(stack_class),
            pin: Cell::new(0),
            incoming_wait: Cell::new(None),
            release_on_resume: Cell::new(None),
        }
    }
}

/// Entry point every pool fiber begins execution at, the first time it is
/// switched into. Takes no meaningful argument: which worker's OS thread
/// happens to be running it is read from that thread's own TLS, since a
/// fiber migrates between workers across its lifetime.
pub type FiberEntry = extern "C" fn(usize);

/// Fixed pool of fibers: `num_workers` root slots (populated lazily by
/// `convert_thread_to_fiber`) followed by pre-armed normal- and
/// extended-stack fibers, plus the free queues that hand the latter two
/// classes out.
pub struct FiberPool {
    fibers: Box<[Fiber]>,
    num_workers: usize,
    free_normal: MpmcQueue<FiberIndex>,
    free_extended: MpmcQueue<FiberIndex>,
}

impl FiberPool {
    /// Build a pool with `fiber_count` total fibers (must be a power of
    /// two — the free queues' capacity requirement), `num_workers` of
    /// which are reserved as root fibers and the rest split between normal
    /// and a fixed `forge_core::constants::EXTENDED_FIBER_COUNT` extended
    /// fibers.
    pub fn new(
        fiber_count: usize,
        num_workers: usize,
        normal_stack_size: usize,
        extended_stack_size: usize,
    ) -> Result<Self, MemoryError> {
        assert!(
            fiber_count.is_power_of_two(),
            "fiber_count must be a power of two, got {fiber_count}"
        );
        let extended_count = forge_core::constants::EXTENDED_FIBER_COUNT;
        assert!(
            fiber_count > num_workers + extended_count,
            "fiber_count {fiber_count} too small for {num_workers} workers + {extended_count} extended fibers"
        );
        let normal_count = fiber_count - num_workers - extended_count;

        let mut fibers: Vec<Fiber> = Vec::with_capacity(fiber_count);
        for _ in 0..num_workers {
            fibers.push(Fiber::root());
        }
        for _ in 0..normal_count {
            let stack = FiberStack::new(normal_stack_size)?;
            fibers.push(Fiber::pooled(stack, StackClass::Normal));
        }
        for _ in 0..extended_count {
            let stack = FiberStack::new(extended_stack_size)?;
            fibers.push(Fiber::pooled(stack, StackClass::Extended));
        }

        let free_normal = MpmcQueue::with_capacity(normal_count.next_power_of_two().max(1));
        let free_extended = MpmcQueue::with_capacity(extended_count.next_power_of_two().max(1));
        for i in 0..normal_count {
            free_normal.push(FiberIndex::new((num_workers + i) as u32));
        }
        for i in 0..extended_count {
            free_extended.push(FiberIndex::new((num_workers + normal_count + i) as u32));
        }

        Ok(Self {
            fibers: fibers.into_boxed_slice(),
            num_workers,
            free_normal,
            free_extended,
        })
    }

    /// Arm every pool (non-root) fiber's initial context to begin
    /// execution at `entry` once switched into for the first time. Called
    /// once, after construction, by the job system (which owns `entry`).
    ///
    /// # Safety
    ///
    /// Must be called before any pool fiber is switched into.
    pub unsafe fn arm(&self, entry: FiberEntry) {
        for idx in self.num_workers..self.fibers.len() {
            let fiber = &self.fibers[idx];
            let stack = fiber.stack.as_ref().expect("pool fiber missing stack");
            arch::current::init_context(fiber.regs.get(), stack.top(), entry as usize, 0);
        }
    }

    /// Convert the calling OS thread into a root fiber at `worker`'s
    /// reserved slot. Must be called once per worker, from that worker's
    /// own thread, before entering the scheduler loop.
    pub fn convert_thread_to_fiber(&self, worker: usize) -> FiberIndex {
        let id = FiberIndex::new(worker as u32);
        tls::set_current_fiber(id);
        tls::set_root_fiber(id);
        id
    }

    #[inline]
    fn fiber(&self, id: FiberIndex) -> &Fiber {
        &self.fibers[id.as_usize()]
    }

    #[inline]
    pub fn pin(&self, id: FiberIndex) -> u32 {
        self.fiber(id).pin.get()
    }

    #[inline]
    pub fn set_pin(&self, id: FiberIndex, pin: u32) {
        self.fiber(id).pin.set(pin);
    }

    #[inline]
    pub fn stack_class(&self, id: FiberIndex) -> StackClass {
        self.fiber(id).stack_class.get()
    }

    #[inline]
    pub fn take_incoming_wait(&self, id: FiberIndex) -> Option<WaitRecord> {
        self.fiber(id).incoming_wait.take()
    }

    #[inline]
    pub fn set_incoming_wait(&self, id: FiberIndex, wait: WaitRecord) {
        self.fiber(id).incoming_wait.set(Some(wait));
    }

    /// Arrange for `to_release` to be returned to its free queue as soon
    /// as `target` (the fiber about to be switched into) resumes.
    #[inline]
    pub fn defer_release(&self, target: FiberIndex, to_release: FiberIndex) {
        self.fiber(target).release_on_resume.set(Some(to_release));
    }

    #[inline]
    pub fn take_deferred_release(&self, id: FiberIndex) -> Option<FiberIndex> {
        self.fiber(id).release_on_resume.take()
    }

    /// Return a finished fiber's index to the free queue matching its
    /// stack class, releasing its stack's physical pages back to the
    /// kernel since it may sit idle for a while.
    pub fn release(&self, id: FiberIndex) {
        let fiber = self.fiber(id);
        if let Some(stack) = &fiber.stack {
            let _ = stack.advise_unused();
        }
        match fiber.stack_class.get() {
            StackClass::Normal => self.free_normal.push(id),
            StackClass::Extended => self.free_extended.push(id),
        }
    }

    /// Acquire a free fiber of the requested class, spinning until one is
    /// available (§4.4.5: bounded by other fibers draining the queue).
    pub fn acquire(&self, class: StackClass) -> FiberIndex {
        match class {
            StackClass::Normal => self.free_normal.pop_spin(),
            StackClass::Extended => self.free_extended.pop_spin(),
        }
    }

    /// Switch the calling thread from fiber `from` to fiber `to`.
    ///
    /// Blocks (from the caller's perspective) until some thread switches
    /// back into `from`; the physical OS thread that eventually resumes
    /// this call may differ from the one that made it.
    ///
    /// # Safety
    ///
    /// `from` must be the fiber currently executing on the calling
    /// thread; `to` must not be concurrently switched into by another
    /// thread.
    pub unsafe fn switch(&self, from: FiberIndex, to: FiberIndex) {
        tls::set_current_fiber(to);
        let old_regs = self.fiber(from).regs.get();
        let new_regs = self.fiber(to).regs.get() as *const SavedRegs;
        arch::current::context_switch(old_regs, new_regs);
        tls::set_current_fiber(from);
    }
}

/// Hook referenced by the architecture trampoline: called if a pool
/// fiber's entry function ever returns, which only happens if the
/// scheduler loop returns on a non-root fiber — a logic error, since
/// shutdown is defined to switch non-root fibers back to their worker's
/// root fiber rather than returning. Parking here (instead of undefined
/// behavior from falling off the trampoline) makes that bug visible as a
/// hung fiber rather than a crash.
#[no_mangle]
pub extern "C" fn fiber_finished() {
    loop {
        std::hint::spin_loop();
    }
}
