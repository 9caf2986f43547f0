//! Binary semaphore used to park/wake idle workers (C6).
//!
//! One instance per worker. `signal` is best-effort: a spurious or
//! redundant wakeup is harmless, the scheduler loop just re-checks its
//! queues and parks again (§5).

use std::sync::{Condvar, Mutex};

pub struct Semaphore {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Wake one waiter, or leave a pending signal for the next `wait` if
    /// nobody is currently parked.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Park until signaled. Consumes at most one pending signal.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.condvar.wait(signaled).unwrap();
        }
        *signaled = false;
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_not_lost() {
        let sem = Semaphore::new();
        sem.signal();
        sem.wait(); // must not block
    }

    #[test]
    fn wait_blocks_until_signaled() {
        let sem = Arc::new(Semaphore::new());
        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            sem2.signal();
        });
        sem.wait();
        handle.join().unwrap();
    }
}
