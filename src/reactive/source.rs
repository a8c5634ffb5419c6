use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Observable, Observer, ObserverList};

/// A writable upstream value.
///
/// Cloning a `Source` yields another handle to the same value.
pub struct Source<T> {
    inner: Arc<SourceInner<T>>,
}

struct SourceInner<T> {
    value: Mutex<T>,
    version: Mutex<u64>,
    observers: ObserverList,
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Source<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                value: Mutex::new(value),
                version: Mutex::new(0),
                observers: ObserverList::default(),
            }),
        }
    }

    /// Returns a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.lock().clone()
    }

    /// Borrows the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.lock())
    }

    /// Incremented on every change.
    pub fn version(&self) -> u64 {
        *self.inner.version.lock()
    }

    /// Replaces the value and synchronously notifies observers.
    pub fn set(&self, value: T) {
        *self.inner.value.lock() = value;
        self.changed();
    }

    /// Mutates the value in place and synchronously notifies observers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.lock());
        self.changed();
    }

    fn changed(&self) {
        *self.inner.version.lock() += 1;
        self.inner.observers.notify_all();
    }
}

impl<T: PartialEq + Clone + Send + 'static> Source<T> {
    /// Like [`set`](Self::set), but only notifies if the value differs.
    ///
    /// Returns true if the value changed.
    pub fn set_if_changed(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.lock();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.changed();
        true
    }
}

impl<T> Observable for Source<T> {
    fn subscribe(&self, observer: Weak<dyn Observer>) {
        self.inner.observers.push(observer);
    }
}
