//! Memoized sorted/filtered views over a collection.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use smallvec::SmallVec;
use tracing::trace;

use crate::coll::CollCore;
use crate::compare::{by_id, Comparator, Filter};
use crate::kind::{Entity, Kind};
use crate::lock;
use crate::subscriber::{Subscribers, Unsubscriber};

/// Identity of a view within its collection.
///
/// Asking a collection twice for the same key yields the same view, whatever
/// comparator and filter come with the second request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey(String);

impl ViewKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a relationship view owned by one scope, e.g. `game/g1/rounds`.
    pub fn relation(owner: Kind, owner_id: &str, name: &str) -> Self {
        Self(format!("{owner}/{owner_id}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ViewKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ViewKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) type Fields = SmallVec<[String; 2]>;

/// Everything needed to build a view.
#[derive(Clone)]
pub struct ViewSpec {
    pub(crate) key: ViewKey,
    pub(crate) compare: Comparator,
    pub(crate) filter: Option<Filter>,
    pub(crate) fields: Fields,
}

impl ViewSpec {
    /// Id-ordered, unfiltered, watching nothing.
    pub fn new(key: impl Into<ViewKey>) -> Self {
        Self {
            key: key.into(),
            compare: by_id(),
            filter: None,
            fields: Fields::new(),
        }
    }

    pub fn sort_by(mut self, compare: Comparator) -> Self {
        self.compare = compare;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Attribute keys whose changes trigger a recompute.
    ///
    /// A view watching no keys is computed once and never again.
    pub fn watch<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn key(&self) -> &ViewKey {
        &self.key
    }
}

impl fmt::Debug for ViewSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSpec")
            .field("key", &self.key)
            .field("filtered", &self.filter.is_some())
            .field("fields", &self.fields)
            .finish()
    }
}

/// A sorted, filtered snapshot of a collection kept current at boundaries.
///
/// Subscribers get the whole snapshot each time one of the watched keys
/// changed within a boundary. There is no debouncing beyond the boundary.
pub struct ScopeCollView<T> {
    key: ViewKey,
    coll: Weak<CollCore>,
    compare: Comparator,
    filter: Option<Filter>,
    fields: Fields,
    snapshot: Mutex<Vec<T>>,
    subscribers: Subscribers<Vec<T>>,
}

impl<T: Entity> ScopeCollView<T> {
    pub(crate) fn new(coll: &Arc<CollCore>, spec: ViewSpec) -> Self {
        let snapshot = coll.sorted_filtered(&spec.compare, spec.filter.as_ref());
        Self {
            key: spec.key,
            coll: Arc::downgrade(coll),
            compare: spec.compare,
            filter: spec.filter,
            fields: spec.fields,
            snapshot: Mutex::new(snapshot),
            subscribers: Subscribers::new(),
        }
    }

    pub fn key(&self) -> &ViewKey {
        &self.key
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The latest snapshot.
    pub fn current(&self) -> Vec<T> {
        lock(&self.snapshot).clone()
    }

    /// Called with every new snapshot. Not called for the current one.
    pub fn subscribe(&self, on_value: impl Fn(&Vec<T>) + Send + Sync + 'static) -> Unsubscriber {
        self.subscribers.subscribe(on_value)
    }

    /// Like [`subscribe`](Self::subscribe), also told when a watched key first
    /// changes within a boundary, with the snapshot about to be replaced.
    pub fn subscribe_with_invalidate(
        &self,
        on_value: impl Fn(&Vec<T>) + Send + Sync + 'static,
        on_invalidate: impl Fn(&Vec<T>) + Send + Sync + 'static,
    ) -> Unsubscriber {
        self.subscribers
            .subscribe_with_invalidate(on_value, on_invalidate)
    }

    pub(crate) fn recompute(&self) {
        if let Some(snapshot) = self.refresh() {
            self.subscribers.notify(&snapshot);
        }
    }

    /// Replace the snapshot without telling subscribers.
    pub(crate) fn refresh(&self) -> Option<Vec<T>> {
        let coll = self.coll.upgrade()?;
        let snapshot = coll.sorted_filtered::<T>(&self.compare, self.filter.as_ref());
        trace!(view = %self.key, len = snapshot.len(), "view recomputed");
        *lock(&self.snapshot) = snapshot.clone();
        Some(snapshot)
    }

    pub(crate) fn invalidate(&self) {
        let stale = self.current();
        self.subscribers.invalidate(&stale);
    }
}

impl<T> fmt::Debug for ScopeCollView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeCollView")
            .field("key", &self.key)
            .field("fields", &self.fields)
            .finish()
    }
}
