//! Publish/subscribe registry with separate invalidation and value channels.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use parking_lot::ReentrantMutex;

use crate::lock;

type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

struct Entry<V> {
    on_value: Callback<V>,
    on_invalidate: Option<Callback<V>>,
}

struct Registry<V> {
    next_id: u64,
    entries: BTreeMap<u64, Entry<V>>,
}

struct Shared<V> {
    registry: Mutex<Registry<V>>,
    /// Held for the whole of a fan-out. Reentrant so callbacks may notify,
    /// subscribe or unsubscribe on the same thread.
    fanout: ReentrantMutex<()>,
}

/// Subscribers of one value source.
///
/// Callbacks run without the registry lock held, so a callback may subscribe
/// or unsubscribe (itself or others) while a notification is in flight. A
/// subscriber removed mid-notification is not called afterwards. Fan-outs from
/// different threads are serialized.
pub(crate) struct Subscribers<V> {
    inner: Arc<Shared<V>>,
}

impl<V: 'static> Subscribers<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                registry: Mutex::new(Registry {
                    next_id: 0,
                    entries: BTreeMap::new(),
                }),
                fanout: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn subscribe(&self, on_value: impl Fn(&V) + Send + Sync + 'static) -> Unsubscriber {
        self.insert(Arc::new(on_value), None)
    }

    pub fn subscribe_with_invalidate(
        &self,
        on_value: impl Fn(&V) + Send + Sync + 'static,
        on_invalidate: impl Fn(&V) + Send + Sync + 'static,
    ) -> Unsubscriber {
        let on_invalidate: Callback<V> = Arc::new(on_invalidate);
        self.insert(Arc::new(on_value), Some(on_invalidate))
    }

    fn insert(&self, on_value: Callback<V>, on_invalidate: Option<Callback<V>>) -> Unsubscriber {
        let id = {
            let mut registry = lock(&self.inner.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.insert(
                id,
                Entry {
                    on_value,
                    on_invalidate,
                },
            );
            id
        };

        let shared: Weak<Shared<V>> = Arc::downgrade(&self.inner);
        Unsubscriber::new(move || {
            if let Some(shared) = shared.upgrade() {
                lock(&shared.registry).entries.remove(&id);
                // Wait out a fan-out in flight on another thread; it may have
                // picked this callback before the removal.
                drop(shared.fanout.lock());
            }
        })
    }

    /// Settled value: every subscriber's value callback.
    pub fn notify(&self, value: &V) {
        self.each(value, |entry| Some(entry.on_value.clone()));
    }

    /// Pending change: every subscriber's invalidation callback, if any.
    pub fn invalidate(&self, value: &V) {
        self.each(value, |entry| entry.on_invalidate.clone());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.inner.registry).entries.len()
    }

    fn each(&self, value: &V, pick: impl Fn(&Entry<V>) -> Option<Callback<V>>) {
        let _fanout = self.inner.fanout.lock();
        let ids: Vec<u64> = lock(&self.inner.registry).entries.keys().copied().collect();
        for id in ids {
            let callback = lock(&self.inner.registry).entries.get(&id).and_then(&pick);
            if let Some(callback) = callback {
                callback(value);
            }
        }
    }
}

/// Removes one subscriber when invoked.
///
/// Dropping an `Unsubscriber` without calling [`unsubscribe`](Self::unsubscribe)
/// leaves the subscription in place.
#[must_use = "keep the Unsubscriber to be able to stop notifications"]
pub struct Unsubscriber {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscriber {
    pub(crate) fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Stop notifications. No callback of this subscriber runs after this returns.
    ///
    /// Called from another thread while the subscriber is being notified, this
    /// blocks until that notification has finished. Called from inside a
    /// notification, it returns at once.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscriber")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
