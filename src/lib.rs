//! tempo-rt: a small cooperative-scheduling runtime.
//!
//! One logical thread drains all deferred work; any number of producer
//! threads feed it. [`EventLoop`] is the scheduling engine (immediate FIFO
//! queue plus a deadline-ordered timer queue with a condvar wake). On top of
//! it sit the lifetime-safety layer ([`Receiver`] / [`ReceiverHandle`] gate
//! deferred callbacks on their owner still being alive), the fan-out
//! combinators ([`parallel()`], [`AsyncParallel`]), an asynchronous mutex
//! ([`AsyncLock`]), and a multi-subscriber event ([`EventCallback`]).
//! [`SharedSingleton`] is a related refcounted-lifecycle utility sharing the
//! spin primitives.
//!
//! This is a software task scheduler, not a network event loop: there is no
//! I/O readiness polling, and nothing here catches a task's panic.

mod async_lock;
mod callback;
mod event_loop;
mod parallel;
mod receiver;
mod singleton;
mod spin;

pub use async_lock::AsyncLock;
pub use callback::EventCallback;
pub use event_loop::{EventLoop, RunError, Task, TimerHandle};
pub use parallel::{parallel, AsyncParallel, Branch, Done};
pub use receiver::{BoundFn, Receiver, ReceiverHandle};
pub use singleton::{Instance, SharedSingleton};
pub use spin::{SpinGuard, SpinLock, SpinReadGuard, SpinRwLock, SpinWriteGuard};
