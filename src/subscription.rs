//! Callback registries and the handle that cancels a registration
//!
//! Every listener in this crate (replica events, controller change bus,
//! ephemeral store, cursor stores) is kept in a `Subscribers<E>` keyed by a
//! random id. Callbacks are cloned out of the registry before they run, so a
//! callback may subscribe, unsubscribe or write back into the same source
//! without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use uuid::Uuid;

pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct Subscribers<E: ?Sized> {
    callbacks: Arc<Mutex<HashMap<Uuid, Callback<E>>>>,
}

impl<E: ?Sized + 'static> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a callback. Dropping the returned handle removes it again.
    pub fn subscribe(&self, callback: Callback<E>) -> Subscription {
        let id = Uuid::new_v4();
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, callback);

        let registry: Weak<Mutex<HashMap<Uuid, Callback<E>>>> = Arc::downgrade(&self.callbacks);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
            }
        })
    }

    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: ?Sized + 'static> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a live registration (listener, relay or timer).
///
/// The registration ends when `unsubscribe` is called or the handle is
/// dropped; both are idempotent.
#[must_use = "dropping a Subscription cancels it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Combine several handles into one that tears all of them down.
    pub fn join(parts: Vec<Subscription>) -> Self {
        Subscription::new(move || drop(parts))
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_live_subscribers_only() {
        let subs: Subscribers<u32> = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let first = subs.subscribe(Arc::new(move |n: &u32| {
            h.fetch_add(*n as usize, Ordering::SeqCst);
        }));
        subs.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        first.unsubscribe();
        subs.emit(&5);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_drop_cancels_and_join_cancels_all() {
        let subs: Subscribers<()> = Subscribers::new();
        {
            let _a = subs.subscribe(Arc::new(|_: &()| {}));
            assert_eq!(subs.len(), 1);
        }
        assert_eq!(subs.len(), 0);

        let joined = Subscription::join(vec![
            subs.subscribe(Arc::new(|_: &()| {})),
            subs.subscribe(Arc::new(|_: &()| {})),
        ]);
        assert_eq!(subs.len(), 2);
        drop(joined);
        assert_eq!(subs.len(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_during_emit() {
        let subs: Arc<Subscribers<()>> = Arc::new(Subscribers::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let s = slot.clone();
        let handle = subs.subscribe(Arc::new(move |_: &()| {
            s.lock().unwrap().take();
        }));
        *slot.lock().unwrap() = Some(handle);

        subs.emit(&());
        assert!(subs.is_empty());
    }
}
