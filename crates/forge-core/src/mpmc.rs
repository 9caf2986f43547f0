//! Bounded lock-free multi-producer/multi-consumer queue.
//!
//! Vyukov's sequence-array design
//! (<https://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue>):
//! a power-of-two ring of cells, each carrying its own sequence number so
//! producers and consumers can tell, without a separate lock, whether a
//! cell is ready for them.
//!
//! `enqueue_pos`, `dequeue_pos`, and the cell array each live on their own
//! cache line so that a producer spinning on `enqueue_pos` never bounces a
//! cache line a consumer is touching.

use crate::constants::CACHE_LINE_SIZE;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU64, Ordering};

#[repr(align(64))]
struct CachePadded<T>(T);

struct Cell<T> {
    sequence: AtomicU64,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded MPMC queue of fixed, power-of-two capacity.
///
/// `T` must be `Copy`-cheap to move (the queue stores payloads by value in
/// the ring, matching the "no allocation inside push/pop" contract).
pub struct MpmcQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    _pad0: [u8; CACHE_LINE_SIZE],
    enqueue_pos: CachePadded<AtomicU64>,
    dequeue_pos: CachePadded<AtomicU64>,
}

// Safety: access to each cell's payload is synchronized by the sequence
// number protocol below, exactly as in the upstream algorithm.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T: Copy> MpmcQueue<T> {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two, or is zero. This is a
    /// programming error per the component's error-handling policy
    /// (assert and abort in debug, UB-by-contract in release), not a
    /// recoverable condition.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity != 0 && capacity.is_power_of_two(),
            "MpmcQueue capacity must be a nonzero power of two, got {capacity}"
        );

        let buffer: Box<[Cell<T>]> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicU64::new(i as u64),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            buffer,
            mask: capacity - 1,
            _pad0: [0u8; CACHE_LINE_SIZE],
            enqueue_pos: CachePadded(AtomicU64::new(0)),
            dequeue_pos: CachePadded(AtomicU64::new(0)),
        }
    }

    /// Queue capacity (always a power of two).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Push a value, spinning until a free cell is claimed.
    ///
    /// Matches the reference algorithm's behavior under a full queue: it
    /// does not return `Err`, it waits for a consumer to make room. Callers
    /// that need a non-blocking check should use `try_push` instead.
    pub fn push(&self, value: T) {
        while !self.try_push(value) {
            core::hint::spin_loop();
        }
    }

    /// Attempt to push once; returns `false` without retrying if full.
    pub fn try_push(&self, value: T) -> bool {
        let mut pos = self.enqueue_pos.0.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos as usize & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - pos as i64;

            if diff == 0 {
                if self
                    .enqueue_pos
                    .0
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe {
                        (*cell.data.get()).write(value);
                    }
                    cell.sequence.store(pos + 1, Ordering::Release);
                    return true;
                }
                // CAS failed: `pos` was refreshed by compare_exchange_weak, retry.
            } else if diff < 0 {
                // Queue full.
                return false;
            } else {
                pos = self.enqueue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop a value; returns `None` when the queue is empty. Never spins.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.0.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos as usize & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as i64 - (pos as i64 + 1);

            if diff == 0 {
                if self
                    .dequeue_pos
                    .0
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let value = unsafe { (*cell.data.get()).assume_init_read() };
                    cell.sequence
                        .store(pos + self.mask as u64 + 1, Ordering::Release);
                    return Some(value);
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Spin until a value is available. Used by call sites that the
    /// specification defines as "busy-spin until available" (resource
    /// exhaustion is bounded by other fibers draining the queue).
    pub fn pop_spin(&self) -> T {
        loop {
            if let Some(v) = self.pop() {
                return v;
            }
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_fifo_single_thread() {
        let q: MpmcQueue<u64> = MpmcQueue::with_capacity(8);
        for i in 0..8 {
            assert!(q.try_push(i));
        }
        assert!(!q.try_push(999));
        for i in 0..8 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_capacity_panics() {
        let _: MpmcQueue<u64> = MpmcQueue::with_capacity(3);
    }

    #[test]
    fn empty_pop_returns_none_without_spinning() {
        let q: MpmcQueue<u32> = MpmcQueue::with_capacity(4);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn mpmc_stress_multiset_equality() {
        const CAP: usize = 1024;
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: u64 = 20_000;

        let q = Arc::new(MpmcQueue::<u64>::with_capacity(CAP));
        let mut handles = vec![];

        for p in 0..PRODUCERS {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                let base = p as u64 * PER_PRODUCER;
                for i in 0..PER_PRODUCER {
                    while !q.try_push(base + i) {
                        core::hint::spin_loop();
                    }
                }
            }));
        }

        let total = PRODUCERS as u64 * PER_PRODUCER;
        let consumed = Arc::new(std::sync::Mutex::new(Vec::with_capacity(total as usize)));
        let mut consumer_handles = vec![];
        for _ in 0..PRODUCERS {
            let q = Arc::clone(&q);
            let consumed = Arc::clone(&consumed);
            consumer_handles.push(thread::spawn(move || loop {
                if let Some(v) = q.pop() {
                    consumed.lock().unwrap().push(v);
                } else {
                    let done = consumed.lock().unwrap().len() as u64 >= total;
                    if done {
                        return;
                    }
                    core::hint::spin_loop();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        for h in consumer_handles {
            h.join().unwrap();
        }

        let got: HashSet<u64> = consumed.lock().unwrap().iter().copied().collect();
        let expected: HashSet<u64> = (0..total).collect();
        assert_eq!(got, expected);
    }
}
