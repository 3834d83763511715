//! Generic multicast subject.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::TRACING_TARGET_OBSERVER;

/// Common behaviour of every observer.
pub trait Observer: Send + Sync {
    /// Returns whether notifications should run off the firing task.
    ///
    /// Async observers are dispatched on the blocking pool and lose any
    /// ordering relative to other observers.
    fn is_async(&self) -> bool {
        false
    }
}

/// Multicast publisher over observers of type `O`.
pub struct Subject<O: ?Sized> {
    observers: RwLock<Vec<Arc<O>>>,
}

impl<O: ?Sized> Default for Subject<O> {
    fn default() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }
}

impl<O: ?Sized> fmt::Debug for Subject<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl<O> Subject<O>
where
    O: ?Sized + Observer + 'static,
{
    /// Creates an empty subject.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub fn register(&self, observer: Arc<O>) {
        self.observers.write().push(observer);
    }

    /// Unregisters an observer by identity. Returns whether it was present.
    pub fn unregister(&self, observer: &Arc<O>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    /// Returns the number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Invokes `inform` for every registered observer.
    ///
    /// Sync observers run inline in registration order. Async observers are
    /// handed to the blocking pool when a tokio runtime is available and run
    /// inline otherwise.
    pub fn fire_inform<F>(&self, inform: F)
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        let observers = self.observers.read().clone();
        if observers.is_empty() {
            return;
        }

        let inform = Arc::new(inform);
        let handle = tokio::runtime::Handle::try_current().ok();
        for observer in observers {
            match (&handle, observer.is_async()) {
                (Some(handle), true) => {
                    let inform = Arc::clone(&inform);
                    handle.spawn_blocking(move || inform(&*observer));
                }
                _ => inform(&*observer),
            }
        }

        tracing::trace!(target: TRACING_TARGET_OBSERVER, "observers informed");
    }
}
