use std::sync::Arc;

use crate::event_loop::EventLoop;
use crate::spin::SpinLock;

type Completion = Box<dyn FnOnce() + Send + 'static>;

/// A fan-out branch: receives a [`Done`] token and must consume it exactly
/// once, possibly asynchronously.
pub type Branch = Box<dyn FnOnce(Done) + Send + 'static>;

struct FanInState {
    remaining: usize,
    completion: Option<Completion>,
}

struct FanIn {
    state: SpinLock<FanInState>,
}

impl FanIn {
    fn new() -> Arc<Self> {
        Arc::new(FanIn {
            state: SpinLock::new(FanInState {
                remaining: 0,
                completion: None,
            }),
        })
    }

    /// Store or run the completion, depending on whether branches are still
    /// outstanding. Taking the stored completion before running it is what
    /// makes double-firing impossible.
    fn finish(&self, completion: Completion) {
        let run_now = {
            let mut state = self.state.lock();
            if state.remaining != 0 {
                state.completion = Some(completion);
                None
            } else {
                Some(completion)
            }
        };
        if let Some(completion) = run_now {
            completion();
        }
    }
}

/// Completion token handed to every branch of a fan-out.
pub struct Done {
    fan_in: Arc<FanIn>,
}

impl Done {
    /// Mark this branch complete. The last branch to finish runs the stored
    /// completion, from whatever context it happens to be on.
    pub fn done(self) {
        let completion = {
            let mut state = self.fan_in.state.lock();
            state.remaining -= 1;
            if state.remaining == 0 {
                state.completion.take()
            } else {
                None
            }
        };
        if let Some(completion) = completion {
            completion();
        }
    }
}

/// Fan out over `branches`, then run `completion` exactly once after every
/// branch has consumed its [`Done`] token.
///
/// Branches start on the calling thread, in order; each may complete
/// synchronously or hand its token to deferred work. If all of them complete
/// synchronously before registration ends, `completion` runs inline.
pub fn parallel(branches: Vec<Branch>, completion: impl FnOnce() + Send + 'static) {
    let fan_in = FanIn::new();
    for branch in branches {
        fan_in.state.lock().remaining += 1;
        branch(Done {
            fan_in: Arc::clone(&fan_in),
        });
    }
    fan_in.finish(Box::new(completion));
}

/// Incremental fan-out: branches are registered one at a time, and the
/// completion can be attached before, between, or after them.
pub struct AsyncParallel {
    event_loop: Arc<EventLoop>,
    fan_in: Arc<FanIn>,
}

impl AsyncParallel {
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        AsyncParallel {
            event_loop,
            fan_in: FanIn::new(),
        }
    }

    /// Register one branch and start it on the calling thread.
    pub fn call(&self, branch: impl FnOnce(Done) + Send + 'static) {
        self.fan_in.state.lock().remaining += 1;
        branch(Done {
            fan_in: Arc::clone(&self.fan_in),
        });
    }

    /// Register one branch that starts from the loop thread: the branch body
    /// bounces through the immediate queue before running, for callers that
    /// must not start work on the submitting thread.
    pub fn defer(&self, branch: impl FnOnce(Done) + Send + 'static) {
        self.fan_in.state.lock().remaining += 1;
        let done = Done {
            fan_in: Arc::clone(&self.fan_in),
        };
        self.event_loop.immediate(move || branch(done));
    }

    /// Attach the completion. Races against the branches: if none remain
    /// outstanding, `f` runs synchronously on the calling thread; otherwise
    /// it is stored and fired by the last [`Done`].
    pub fn completed(&self, f: impl FnOnce() + Send + 'static) {
        self.fan_in.finish(Box::new(f));
    }
}
