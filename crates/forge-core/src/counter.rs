//! Job counters: the unit of synchronization for a submitted batch.

use crate::ids::CounterIndex;
use crate::job::StackClass;
use crate::mpmc::MpmcQueue;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// A single counter slot.
///
/// `count` starts at the batch size and is decremented once per finished
/// job; `stack_size` records which free-fiber queue a waiter on this
/// counter should draw from.
pub struct JobCounter {
    count: AtomicU32,
    stack_size: AtomicU8,
}

const STACK_NORMAL: u8 = 0;
const STACK_EXTENDED: u8 = 1;

impl JobCounter {
    const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            stack_size: AtomicU8::new(STACK_NORMAL),
        }
    }

    /// Initialize for a new batch of `n` jobs.
    pub fn init(&self, n: u32, stack_class: StackClass) {
        self.stack_size.store(
            match stack_class {
                StackClass::Normal => STACK_NORMAL,
                StackClass::Extended => STACK_EXTENDED,
            },
            Ordering::Relaxed,
        );
        self.count.store(n, Ordering::SeqCst);
    }

    /// Current count (sequentially consistent, matching the decrement op).
    #[inline]
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Decrement by one as a job completes; returns the count *after* the
    /// decrement. Never underflows: the scheduler only calls this once per
    /// job it actually ran, and a counter's `n` is exactly its job count.
    #[inline]
    pub fn decrement(&self) -> u32 {
        self.count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    #[inline]
    pub fn stack_class(&self) -> StackClass {
        if self.stack_size.load(Ordering::Relaxed) == STACK_EXTENDED {
            StackClass::Extended
        } else {
            StackClass::Normal
        }
    }
}

/// Fixed pool of counters plus the free-index queue that hands them out.
///
/// Counter indices have no sentinel (see `ids::CounterIndex`): the free
/// queue is seeded with every index including 0, and "no counter
/// available" is observed only as `pop` returning `None`.
pub struct CounterPool {
    counters: Box<[JobCounter]>,
    free: MpmcQueue<CounterIndex>,
}

impl CounterPool {
    /// Build a pool of `capacity` counters (must be a power of two, the
    /// free queue's capacity requirement), all initially free.
    pub fn new(capacity: usize) -> Self {
        let counters: Box<[JobCounter]> = (0..capacity).map(|_| JobCounter::new()).collect();
        let free = MpmcQueue::with_capacity(capacity);
        for i in 0..capacity {
            free.push(CounterIndex(i as u32));
        }
        Self { counters, free }
    }

    /// Borrow a counter by index.
    #[inline]
    pub fn get(&self, id: CounterIndex) -> &JobCounter {
        &self.counters[id.as_usize()]
    }

    /// Acquire a free counter, spinning until one is available (resource
    /// exhaustion is bounded by in-flight batches draining).
    pub fn acquire(&self, n: u32, stack_class: StackClass) -> CounterIndex {
        let id = self.free.pop_spin();
        self.counters[id.as_usize()].init(n, stack_class);
        id
    }

    /// Return a counter to the free pool. Caller must ensure no job still
    /// references it.
    pub fn release(&self, id: CounterIndex) {
        self.free.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_reaches_zero_after_n_decrements() {
        let pool = CounterPool::new(4);
        let id = pool.acquire(3, StackClass::Normal);
        let c = pool.get(id);
        assert_eq!(c.get(), 3);
        assert_eq!(c.decrement(), 2);
        assert_eq!(c.decrement(), 1);
        assert_eq!(c.decrement(), 0);
    }

    #[test]
    fn counter_index_zero_is_usable() {
        let pool = CounterPool::new(2);
        let a = pool.acquire(1, StackClass::Normal);
        let b = pool.acquire(1, StackClass::Normal);
        // One of the two acquired indices is 0 — no sentinel skips it.
        assert!(a.as_u32() == 0 || b.as_u32() == 0);
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn release_and_reacquire() {
        let pool = CounterPool::new(2);
        let id = pool.acquire(5, StackClass::Normal);
        pool.release(id);
        let id2 = pool.acquire(1, StackClass::Extended);
        assert_eq!(pool.get(id2).get(), 1);
        assert_eq!(pool.get(id2).stack_class(), StackClass::Extended);
    }
}
