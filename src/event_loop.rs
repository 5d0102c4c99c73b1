use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use concurrent_queue::ConcurrentQueue;
use thiserror::Error;
use tracing::{debug, trace};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a pending timer for cancellation. Handles are minted per loop
/// instance and are meaningless across instances; an interval keeps the same
/// handle across re-arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("event loop is already running")]
    AlreadyRunning,
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[source] io::Error),
}

enum TimerEntry {
    Once(Task),
    Interval {
        task: Box<dyn FnMut() + Send + 'static>,
        period: Duration,
    },
}

/// Timer storage: BTreeMap for ordered expiry iteration, HashMap for
/// handle-to-deadline lookup.
///
/// The `(deadline, handle)` key doubles as the deadline tie-break: entries
/// that share a deadline fire in ascending handle order.
struct TimerState {
    entries: BTreeMap<(Instant, u64), TimerEntry>,
    deadlines: HashMap<u64, Instant>,
}

/// What the timer pass found: a due entry (with the deadline it was keyed
/// under, needed for interval re-arming), a future deadline to sleep toward,
/// or nothing pending.
enum TimerPoll {
    Due(u64, Instant, TimerEntry),
    Sleep(Instant),
    Empty,
}

/// Single-consumer event loop accepting work from any thread.
///
/// All submitted tasks execute serially on whichever thread drives the loop
/// (`run` spawns one, `run_sync` donates the caller). Immediate tasks run in
/// FIFO submission order; timed tasks run in deadline order. A task panic is
/// not caught and unwinds the loop thread.
pub struct EventLoop {
    running: AtomicBool,
    /// Immediate work, drained fully at the start of every pass.
    queue: ConcurrentQueue<Task>,
    timers: Mutex<TimerState>,
    next_handle: AtomicU64,
    /// Wake signal, deliberately separate from both work queues so a
    /// producer never contends with the consumer beyond the notify itself.
    poke_lock: Mutex<bool>,
    poke_cond: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(EventLoop {
            running: AtomicBool::new(false),
            queue: ConcurrentQueue::unbounded(),
            timers: Mutex::new(TimerState {
                entries: BTreeMap::new(),
                deadlines: HashMap::new(),
            }),
            next_handle: AtomicU64::new(0),
            poke_lock: Mutex::new(false),
            poke_cond: Condvar::new(),
            worker: Mutex::new(None),
        })
    }

    /// Queue `task` for the next drain pass. FIFO relative to other
    /// immediate submissions; no ordering relative to timer tasks.
    pub fn immediate(&self, task: impl FnOnce() + Send + 'static) {
        // The queue is unbounded and never closed; push cannot fail.
        assert!(self.queue.push(Box::new(task)).is_ok());
        self.poke();
    }

    /// Schedule `task` to run once, `delay` from now.
    pub fn timeout(&self, task: impl FnOnce() + Send + 'static, delay: Duration) -> TimerHandle {
        self.insert_timer(TimerEntry::Once(Box::new(task)), delay)
    }

    /// Schedule `task` to run every `period`, starting one `period` from
    /// now. Re-arming accumulates on the previous deadline rather than
    /// re-reading the clock, so long-run drift stays bounded.
    pub fn interval(&self, task: impl FnMut() + Send + 'static, period: Duration) -> TimerHandle {
        self.insert_timer(
            TimerEntry::Interval {
                task: Box::new(task),
                period,
            },
            period,
        )
    }

    fn insert_timer(&self, entry: TimerEntry, delay: Duration) -> TimerHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        {
            let mut timers = self.timers.lock().unwrap();
            timers.deadlines.insert(handle, deadline);
            timers.entries.insert((deadline, handle), entry);
        }
        trace!(handle, ?delay, "timer scheduled");
        self.poke();
        TimerHandle(handle)
    }

    /// Cancel a pending timer.
    ///
    /// Best-effort for a one-shot that is already due: an entry the loop has
    /// popped for execution will still fire. An interval observed as cleared
    /// is guaranteed never to re-arm.
    pub fn clear(&self, handle: TimerHandle) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(deadline) = timers.deadlines.remove(&handle.0) {
            timers.entries.remove(&(deadline, handle.0));
            trace!(handle = handle.0, "timer cleared");
        }
    }

    /// Discard all pending immediate and timer work. Tasks submitted
    /// concurrently with the call may land after the discard point and
    /// survive.
    pub fn clear_all(&self) {
        {
            let mut timers = self.timers.lock().unwrap();
            timers.entries.clear();
            timers.deadlines.clear();
        }
        while self.queue.pop().is_ok() {}
        debug!("all pending work cleared");
    }

    /// Start the loop on a named background thread; returns immediately.
    pub fn run(self: &Arc<Self>) -> Result<(), RunError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RunError::AlreadyRunning);
        }
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("tempo-loop".into())
            .spawn(move || this.run_loop());
        match handle {
            Ok(handle) => {
                *self.worker.lock().unwrap() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(RunError::Spawn(err))
            }
        }
    }

    /// Run the loop on the calling thread until [`stop`](Self::stop).
    pub fn run_sync(&self) -> Result<(), RunError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RunError::AlreadyRunning);
        }
        self.run_loop();
        Ok(())
    }

    /// Request termination. The loop finishes its current drain pass and
    /// exits; pending work is not guaranteed to execute.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        debug!("stop requested");
        self.poke();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for a [`run`](Self::run) background thread to exit. No-op when
    /// the loop was driven by `run_sync` or never started. Calling this from
    /// a task on the loop itself deadlocks.
    pub fn join(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Run blocking `work` on a detached helper thread, then hand `callback`
    /// back into the loop via [`immediate`](Self::immediate). The blessed way
    /// for a task to do long-running work without stalling the loop.
    pub fn background(
        self: &Arc<Self>,
        work: impl FnOnce() + Send + 'static,
        callback: impl FnOnce() + Send + 'static,
    ) {
        let this = Arc::clone(self);
        thread::spawn(move || {
            work();
            this.immediate(callback);
        });
    }

    fn run_loop(&self) {
        debug!("loop started");
        while self.running.load(Ordering::SeqCst) {
            self.drain_immediate();

            let next_deadline = loop {
                match self.poll_timers() {
                    TimerPoll::Due(handle, deadline, entry) => {
                        self.fire_timer(handle, deadline, entry);
                        // Immediate work submitted by the timer runs before
                        // the next timer is considered.
                        self.drain_immediate();
                    }
                    TimerPoll::Sleep(deadline) => break Some(deadline),
                    TimerPoll::Empty => break None,
                }
            };

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.sleep(next_deadline);
        }
        debug!("loop exited");
    }

    fn drain_immediate(&self) {
        while let Ok(task) = self.queue.pop() {
            task();
        }
    }

    fn poll_timers(&self) -> TimerPoll {
        let mut timers = self.timers.lock().unwrap();
        match timers.entries.keys().next().copied() {
            Some((deadline, handle)) if deadline <= Instant::now() => {
                let entry = timers.entries.remove(&(deadline, handle)).unwrap();
                // A one-shot leaves the reverse index here; an interval keeps
                // its slot so a clear() that lands mid-fire still suppresses
                // the re-arm.
                if matches!(entry, TimerEntry::Once(_)) {
                    timers.deadlines.remove(&handle);
                }
                TimerPoll::Due(handle, deadline, entry)
            }
            Some((deadline, _)) => TimerPoll::Sleep(deadline),
            None => TimerPoll::Empty,
        }
    }

    fn fire_timer(&self, handle: u64, deadline: Instant, entry: TimerEntry) {
        match entry {
            TimerEntry::Once(task) => {
                trace!(handle, "timeout fired");
                task();
            }
            TimerEntry::Interval { mut task, period } => {
                trace!(handle, "interval fired");
                task();
                let next = deadline + period;
                let mut timers = self.timers.lock().unwrap();
                if timers.deadlines.contains_key(&handle) {
                    timers.deadlines.insert(handle, next);
                    timers
                        .entries
                        .insert((next, handle), TimerEntry::Interval { task, period });
                }
                // A missing slot means the interval was cleared while its
                // tick ran; the task is dropped instead of re-armed.
            }
        }
    }

    /// Block until a poke arrives or `deadline` elapses. A poke that landed
    /// while work was executing is consumed here without sleeping.
    fn sleep(&self, deadline: Option<Instant>) {
        let mut poked = self.poke_lock.lock().unwrap();
        if !*poked {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        let (guard, _) = self
                            .poke_cond
                            .wait_timeout(poked, deadline - now)
                            .unwrap();
                        poked = guard;
                    }
                }
                None => {
                    poked = self.poke_cond.wait(poked).unwrap();
                }
            }
        }
        *poked = false;
    }

    fn poke(&self) {
        let mut poked = self.poke_lock.lock().unwrap();
        *poked = true;
        self.poke_cond.notify_one();
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
