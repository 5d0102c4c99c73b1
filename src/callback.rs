use std::sync::Arc;

use crate::receiver::{Receiver, ReceiverHandle};
use crate::spin::SpinLock;

type Callback<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

struct Entry<T> {
    handle: ReceiverHandle,
    callback: Callback<T>,
}

/// A named event with any number of independently-subscribed receivers.
///
/// The list holds only each subscriber's [`ReceiverHandle`], never the
/// subscriber itself, so dropping a subscriber needs no synchronous list
/// mutation — its entry is pruned on the next [`emit`](Self::emit).
pub struct EventCallback<T> {
    subscribers: SpinLock<Vec<Entry<T>>>,
}

impl<T> EventCallback<T> {
    pub const fn new() -> Self {
        EventCallback {
            subscribers: SpinLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> EventCallback<T> {
    pub fn subscribe(&self, receiver: &Receiver, callback: impl Fn(T) + Send + Sync + 'static) {
        let entry = Entry {
            handle: receiver.handle(),
            callback: Arc::new(callback),
        };
        self.subscribers.lock().push(entry);
    }

    /// Schedule every live subscriber's callback with a copy of `args`, in
    /// subscription order, pruning dead subscribers in place.
    ///
    /// Scheduling happens under the list lock; the callback bodies run later
    /// on each receiver's loop thread, so a body may subscribe or emit again
    /// without deadlocking.
    pub fn emit(&self, args: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|entry| {
            let callback = Arc::clone(&entry.callback);
            let args = args.clone();
            entry.handle.submit_immediate(move || callback(args))
        });
    }
}

impl<T> Default for EventCallback<T> {
    fn default() -> Self {
        EventCallback::new()
    }
}
