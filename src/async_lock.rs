use std::sync::atomic::{AtomicBool, Ordering};

use concurrent_queue::ConcurrentQueue;

use crate::receiver::{BoundFn, Receiver};

/// Asynchronous mutual exclusion: instead of blocking, a locker queues a
/// task that enters the owning receiver's loop once the lock is available.
///
/// Exactly one queued task is inside the lock at a time; tasks are serviced
/// in FIFO submission order. A task that has entered the lock must call
/// [`unlock`](Self::unlock) when its critical section ends. Entries whose
/// receiver died while waiting are dropped silently and never block the
/// queue.
pub struct AsyncLock {
    held: AtomicBool,
    queue: ConcurrentQueue<BoundFn>,
}

impl AsyncLock {
    pub fn new() -> Self {
        AsyncLock {
            held: AtomicBool::new(false),
            queue: ConcurrentQueue::unbounded(),
        }
    }

    /// Queue `task` to run inside the lock as soon as it is available.
    pub fn lock(&self, receiver: &Receiver, task: impl FnOnce() + Send + 'static) {
        // The queue is unbounded and never closed; push cannot fail.
        assert!(self.queue.push(BoundFn::new(receiver, task)).is_ok());
        self.progress();
    }

    /// Release the lock on behalf of the task currently inside it and hand
    /// it to the next waiter, if any.
    pub fn unlock(&self) {
        self.held.store(false, Ordering::Release);
        self.progress();
    }

    fn progress(&self) {
        loop {
            if self.held.swap(true, Ordering::AcqRel) {
                // Someone else is inside the lock; their unlock drives the
                // queue further.
                return;
            }
            loop {
                match self.queue.pop() {
                    Ok(entry) => {
                        if entry.fire() {
                            // The fired task owns the lock until unlock().
                            return;
                        }
                        // Dead receiver: entry dropped, try the next waiter.
                    }
                    Err(_) => {
                        self.held.store(false, Ordering::Release);
                        break;
                    }
                }
            }
            // A push may have slipped in between the empty pop and the
            // release above; retry so that waiter is not stranded.
            if self.queue.is_empty() {
                return;
            }
        }
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        AsyncLock::new()
    }
}
