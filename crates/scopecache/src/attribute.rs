//! Attribute snapshots and the per-attribute change cell.

use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::edge::AttributeEdge;
use crate::error::{CacheError, Result};
use crate::lock;
use crate::subscriber::{Subscribers, Unsubscriber};

/// Immutable snapshot of one attribute edge.
///
/// The serialized value is decoded on first read and memoized. Updates never
/// touch an existing `Attribute`; the owning [`AttributeRef`] swaps in a new one.
#[derive(Debug)]
pub struct Attribute {
    edge: AttributeEdge,
    decoded: OnceLock<Value>,
}

impl Attribute {
    pub fn new(edge: AttributeEdge) -> Self {
        Self {
            edge,
            decoded: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.edge.id
    }

    pub fn scope_id(&self) -> &str {
        self.edge.scope_id()
    }

    pub fn key(&self) -> &str {
        &self.edge.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.edge.created_at
    }

    pub fn edge(&self) -> &AttributeEdge {
        &self.edge
    }

    /// Decoded value, `None` when the edge carries no payload.
    ///
    /// A payload that is not valid JSON is reported here, at read time.
    pub fn value(&self) -> Result<Option<&Value>> {
        let Some(raw) = self.edge.val.as_deref() else {
            return Ok(None);
        };
        if let Some(value) = self.decoded.get() {
            return Ok(Some(value));
        }

        let value: Value = serde_json::from_str(raw).map_err(|source| CacheError::Decode {
            attribute_id: self.edge.id.clone(),
            key: self.edge.key.clone(),
            source,
        })?;
        Ok(Some(self.decoded.get_or_init(|| value)))
    }
}

struct RefState {
    attribute: Arc<Attribute>,
    deleted: bool,
    pending: bool,
}

/// Change cell for one attribute id.
///
/// Changes are announced in two phases: [`set_edge`](Self::set_edge) and
/// [`mark_deleted`](Self::mark_deleted) invalidate subscribers right away,
/// then [`flush`](Self::flush) at the next done-boundary delivers the settled
/// value once. Deletion is terminal for the lifetime of the ref.
pub struct AttributeRef {
    state: Mutex<RefState>,
    subscribers: Subscribers<Option<Arc<Attribute>>>,
}

impl AttributeRef {
    pub(crate) fn new(edge: AttributeEdge) -> Self {
        Self {
            state: Mutex::new(RefState {
                attribute: Arc::new(Attribute::new(edge)),
                deleted: false,
                pending: false,
            }),
            subscribers: Subscribers::new(),
        }
    }

    /// Current attribute, `None` once deleted.
    pub fn attribute(&self) -> Option<Arc<Attribute>> {
        let state = lock(&self.state);
        (!state.deleted).then(|| state.attribute.clone())
    }

    pub fn is_deleted(&self) -> bool {
        lock(&self.state).deleted
    }

    pub fn has_pending_change(&self) -> bool {
        lock(&self.state).pending
    }

    /// Replace the held attribute. Ignored once the ref is deleted.
    ///
    /// Returns whether the edge was taken.
    pub(crate) fn set_edge(&self, edge: AttributeEdge) -> bool {
        let current = {
            let mut state = lock(&self.state);
            if state.deleted {
                return false;
            }
            state.attribute = Arc::new(Attribute::new(edge));
            state.pending = true;
            Some(state.attribute.clone())
        };
        self.subscribers.invalidate(&current);
        true
    }

    pub(crate) fn mark_deleted(&self) {
        {
            let mut state = lock(&self.state);
            state.deleted = true;
            state.pending = true;
        }
        self.subscribers.invalidate(&None);
    }

    /// Deliver the settled value if a change is pending.
    pub(crate) fn flush(&self) {
        let current = {
            let mut state = lock(&self.state);
            if !state.pending {
                return;
            }
            state.pending = false;
            (!state.deleted).then(|| state.attribute.clone())
        };
        self.subscribers.notify(&current);
    }

    /// Called with the settled attribute after each boundary that changed it.
    pub fn subscribe(
        &self,
        on_value: impl Fn(&Option<Arc<Attribute>>) + Send + Sync + 'static,
    ) -> Unsubscriber {
        self.subscribers.subscribe(on_value)
    }

    /// Like [`subscribe`](Self::subscribe), also told as soon as a change arrives.
    pub fn subscribe_with_invalidate(
        &self,
        on_value: impl Fn(&Option<Arc<Attribute>>) + Send + Sync + 'static,
        on_invalidate: impl Fn(&Option<Arc<Attribute>>) + Send + Sync + 'static,
    ) -> Unsubscriber {
        self.subscribers
            .subscribe_with_invalidate(on_value, on_invalidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn edge(val: Option<&str>) -> AttributeEdge {
        let edge = AttributeEdge::new("a1", "s1", "score");
        match val {
            Some(v) => edge.with_raw_val(v),
            None => edge,
        }
    }

    #[test]
    fn test_value_absent_vs_null() {
        assert_eq!(Attribute::new(edge(None)).value().unwrap(), None);
        assert_eq!(
            Attribute::new(edge(Some("null"))).value().unwrap(),
            Some(&Value::Null)
        );
        assert_eq!(
            Attribute::new(edge(Some(r#"{"a":[1,2]}"#))).value().unwrap(),
            Some(&json!({"a": [1, 2]}))
        );
    }

    #[test]
    fn test_malformed_value_fails_at_read() {
        let attr = Attribute::new(edge(Some("{not json")));
        assert_eq!(attr.key(), "score");

        let err = attr.value().unwrap_err();
        assert!(matches!(err, CacheError::Decode { ref attribute_id, .. } if attribute_id == "a1"));
    }

    #[test]
    fn test_set_edge_invalidates_then_flush_notifies() {
        let cell = AttributeRef::new(edge(Some("1")));
        let values = Arc::new(Mutex::new(Vec::new()));
        let invalidations = Arc::new(AtomicUsize::new(0));

        let v = values.clone();
        let i = invalidations.clone();
        let _unsub = cell.subscribe_with_invalidate(
            move |attr| {
                let value = attr.as_ref().and_then(|a| a.value().unwrap().cloned());
                v.lock().unwrap().push(value);
            },
            move |_| {
                i.fetch_add(1, Ordering::SeqCst);
            },
        );

        // Nothing pending yet.
        cell.flush();
        assert!(values.lock().unwrap().is_empty());

        assert!(cell.set_edge(edge(Some("2"))));
        assert!(cell.set_edge(edge(Some("3"))));
        assert_eq!(invalidations.load(Ordering::SeqCst), 2);
        assert!(values.lock().unwrap().is_empty());
        assert!(cell.has_pending_change());

        cell.flush();
        cell.flush();
        assert_eq!(*values.lock().unwrap(), vec![Some(json!(3))]);
        assert!(!cell.has_pending_change());
    }

    #[test]
    fn test_deletion_is_terminal() {
        let cell = AttributeRef::new(edge(Some("1")));
        let settled = Arc::new(Mutex::new(Vec::new()));

        let s = settled.clone();
        let _unsub = cell.subscribe(move |attr| s.lock().unwrap().push(attr.is_some()));

        cell.mark_deleted();
        assert!(cell.attribute().is_none());

        assert!(!cell.set_edge(edge(Some("5"))));
        assert!(cell.attribute().is_none());
        assert!(cell.is_deleted());

        cell.flush();
        assert_eq!(*settled.lock().unwrap(), vec![false]);
    }
}
