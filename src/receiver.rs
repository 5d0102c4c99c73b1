use std::sync::{Arc, Weak};

use tracing::trace;

use crate::event_loop::{EventLoop, Task};

/// The shared liveness record: its strong count is the liveness flag. The
/// owning [`Receiver`] holds the only long-lived strong reference; handles
/// hold weak ones and upgrade at dispatch time.
struct ReceiverCore {
    event_loop: Arc<EventLoop>,
}

/// Ties the lifetime of deferred callbacks to the lifetime of their logical
/// owner.
///
/// A `Receiver` mints [`ReceiverHandle`]s; a handle accepts submissions only
/// while its receiver is alive. Dropping the receiver is the irrevocable
/// one-way "dead" transition — handles and queued [`BoundFn`]s already in
/// flight become refusing no-ops without any list bookkeeping.
pub struct Receiver {
    core: Arc<ReceiverCore>,
}

impl Receiver {
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Receiver {
            core: Arc::new(ReceiverCore { event_loop }),
        }
    }

    pub fn handle(&self) -> ReceiverHandle {
        ReceiverHandle {
            core: Arc::downgrade(&self.core),
        }
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.core.event_loop
    }
}

impl Clone for Receiver {
    /// A clone is a distinct receiver with its own lifetime, bound to the
    /// same loop; handles minted from the original are unaffected.
    fn clone(&self) -> Self {
        Receiver::new(Arc::clone(&self.core.event_loop))
    }
}

/// Weak reference to a receiver's liveness record; cheap to clone and safe
/// to hold from any thread for any duration.
#[derive(Clone)]
pub struct ReceiverHandle {
    core: Weak<ReceiverCore>,
}

impl ReceiverHandle {
    pub fn alive(&self) -> bool {
        self.core.strong_count() > 0
    }

    /// Forward `task` to the receiver's loop if the receiver is still alive.
    /// Returns whether the submission was accepted; a refused task is
    /// dropped along with everything it captured, never invoked.
    ///
    /// The upgrade is the atomicity boundary: while the strong reference
    /// obtained here is held across the queue push, a concurrent drop of the
    /// receiver cannot finish retiring the record, so the dead transition is
    /// observed consistently by both sides. Once accepted, the task runs even
    /// if the receiver dies before the loop drains it — tasks own their
    /// captures, so there is nothing unsound about outliving the receiver.
    pub fn submit_immediate(&self, task: impl FnOnce() + Send + 'static) -> bool {
        match self.core.upgrade() {
            Some(core) => {
                core.event_loop.immediate(task);
                true
            }
            None => {
                trace!("submission refused: receiver dead");
                false
            }
        }
    }
}

/// A handle paired with a one-shot task; the unit combinators queue instead
/// of a raw closure whenever the closure captures receiver state.
pub struct BoundFn {
    handle: ReceiverHandle,
    task: Task,
}

impl BoundFn {
    pub fn new(receiver: &Receiver, task: impl FnOnce() + Send + 'static) -> Self {
        BoundFn {
            handle: receiver.handle(),
            task: Box::new(task),
        }
    }

    pub fn alive(&self) -> bool {
        self.handle.alive()
    }

    /// Dispatch the wrapped task through the handle. Returns whether it was
    /// accepted; on refusal the task is dropped unrun.
    pub fn fire(self) -> bool {
        let BoundFn { handle, task } = self;
        handle.submit_immediate(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(pred: impl Fn() -> bool) {
        let start = Instant::now();
        while !pred() {
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "condition not reached in time"
            );
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn live_receiver_accepts_and_runs() {
        let el = EventLoop::new();
        el.run().unwrap();
        let receiver = Receiver::new(el.clone());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let accepted = receiver
            .handle()
            .submit_immediate(move || flag.store(true, Ordering::SeqCst));
        assert!(accepted);
        wait_for(|| ran.load(Ordering::SeqCst));
        el.stop();
        el.join();
    }

    #[test]
    fn dead_receiver_refuses_and_drops_task() {
        let el = EventLoop::new();
        el.run().unwrap();
        let receiver = Receiver::new(el.clone());
        let handle = receiver.handle();
        drop(receiver);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        assert!(!handle.alive());
        let accepted = handle.submit_immediate(move || flag.store(true, Ordering::SeqCst));
        assert!(!accepted);
        thread::sleep(Duration::from_millis(50));
        assert!(!ran.load(Ordering::SeqCst), "task ran past receiver death");
        el.stop();
        el.join();
    }

    #[test]
    fn bound_fn_refuses_after_receiver_drop() {
        let el = EventLoop::new();
        let receiver = Receiver::new(el.clone());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let bound = BoundFn::new(&receiver, move || flag.store(true, Ordering::SeqCst));
        assert!(bound.alive());
        drop(receiver);
        assert!(!bound.alive());
        assert!(!bound.fire());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn dropped_task_releases_captured_state() {
        let el = EventLoop::new();
        let receiver = Receiver::new(el.clone());
        let payload = Arc::new(());
        let captured = payload.clone();
        let bound = BoundFn::new(&receiver, move || {
            let _ = &captured;
        });
        drop(receiver);
        assert!(!bound.fire());
        // The refused task must not be leaked somewhere waiting to run.
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn clone_mints_an_independent_lifetime() {
        let el = EventLoop::new();
        let original = Receiver::new(el.clone());
        let cloned = original.clone();
        let original_handle = original.handle();
        let cloned_handle = cloned.handle();
        drop(original);
        assert!(!original_handle.alive());
        assert!(cloned_handle.alive(), "clone must survive the original");
    }

    #[test]
    fn handles_report_liveness_across_threads() {
        let el = EventLoop::new();
        let receiver = Receiver::new(el.clone());
        let handle = receiver.handle();
        let observer = thread::spawn(move || {
            let start = Instant::now();
            while handle.alive() {
                assert!(start.elapsed() < Duration::from_secs(5), "never died");
                thread::yield_now();
            }
        });
        thread::sleep(Duration::from_millis(20));
        drop(receiver);
        observer.join().unwrap();
    }
}
