use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::spin::SpinRwLock;

/// Reference-counted lazily-constructed singleton state.
///
/// The application owns this object explicitly — typically in a `static`,
/// which the `const` constructor allows — and passes it to consumers instead
/// of hiding it behind a per-type global. [`instance`](Self::instance) uses
/// double-checked locking so the warm path takes only the read lock; the
/// value is torn down when the last [`Instance`] is dropped, and the next
/// acquisition after that constructs a fresh one.
pub struct SharedSingleton<T> {
    refcount: AtomicUsize,
    slot: SpinRwLock<Option<Arc<T>>>,
}

impl<T> SharedSingleton<T> {
    pub const fn new() -> Self {
        SharedSingleton {
            refcount: AtomicUsize::new(0),
            slot: SpinRwLock::new(None),
        }
    }

    /// Acquire the singleton, constructing it with `init` if no live
    /// instance exists. `init` runs at most once per live span.
    pub fn instance(&self, init: impl FnOnce() -> T) -> Instance<'_, T> {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        if let Some(value) = self.slot.read().as_ref().map(Arc::clone) {
            return Instance { owner: self, value };
        }
        let mut slot = self.slot.write();
        if slot.is_none() {
            *slot = Some(Arc::new(init()));
        }
        let value = slot.as_ref().map(Arc::clone).unwrap();
        Instance { owner: self, value }
    }

    /// Whether a constructed instance is currently published.
    pub fn is_live(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl<T> Default for SharedSingleton<T> {
    fn default() -> Self {
        SharedSingleton::new()
    }
}

/// A counted handle to the singleton value. Cloning increments the process
/// refcount; dropping the last handle retires the value.
pub struct Instance<'a, T> {
    owner: &'a SharedSingleton<T>,
    value: Arc<T>,
}

impl<T> Deref for Instance<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<'a, T> Clone for Instance<'a, T> {
    fn clone(&self) -> Self {
        self.owner.refcount.fetch_add(1, Ordering::AcqRel);
        Instance {
            owner: self.owner,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Drop for Instance<'_, T> {
    fn drop(&mut self) {
        if self.owner.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut slot = self.owner.slot.write();
            // A racing acquisition may have revived the count between the
            // decrement and the write lock; only a true last release clears
            // the slot.
            if self.owner.refcount.load(Ordering::Acquire) == 0 {
                *slot = None;
            }
        }
        // The Arc field drops after this body: the value itself is destroyed
        // outside the write lock, by whichever handle held the last strong
        // reference.
    }
}
