//! One logical entity and the attributes it holds.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{trace, warn};

use crate::attribute::{Attribute, AttributeRef};
use crate::config::CacheConfig;
use crate::conn::{Conn, ConnShared};
use crate::edge::AttributeEdge;
use crate::error::{CacheError, Result};
use crate::kind::Kind;
use crate::lock;
use crate::subscriber::Unsubscriber;

struct ScopeState {
    /// Every ref ever created, deleted ones included, in arrival order.
    refs: Vec<Arc<AttributeRef>>,
    by_id: HashMap<String, usize>,
    /// Live ref for each key.
    by_key: HashMap<String, usize>,
    /// Refs changed since the last boundary, flushed when it arrives.
    pending: Vec<Arc<AttributeRef>>,
    ready: bool,
}

impl ScopeState {
    fn record(&mut self, cell: &Arc<AttributeRef>) {
        if !self.pending.iter().any(|p| Arc::ptr_eq(p, cell)) {
            self.pending.push(cell.clone());
        }
    }
}

enum Intake {
    Delete(Arc<AttributeRef>),
    Replace(Arc<AttributeRef>, AttributeEdge),
    Nothing,
}

/// A single entity (player, batch, game, ...) mirrored from the authority.
///
/// Fields are addressed by attribute key. A scope is *ready* when no change
/// has arrived since the last done-boundary; any change makes it not-ready
/// until the next boundary.
pub struct Scope {
    id: String,
    kind: Kind,
    conn: Weak<ConnShared>,
    config: Arc<CacheConfig>,
    state: Mutex<ScopeState>,
}

impl Scope {
    pub(crate) fn new(
        id: String,
        kind: Kind,
        conn: Weak<ConnShared>,
        config: Arc<CacheConfig>,
    ) -> Self {
        Self {
            id,
            kind,
            conn,
            config,
            state: Mutex::new(ScopeState {
                refs: Vec::new(),
                by_id: HashMap::new(),
                by_key: HashMap::new(),
                pending: Vec::new(),
                ready: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.state).ready
    }

    /// Decoded value of `key`, `None` if absent or deleted.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.get_attribute(key) {
            Some(attribute) => Ok(attribute.value()?.cloned()),
            None => Ok(None),
        }
    }

    /// String value of `key`. Non-string values read as `None`.
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        Ok(match self.get(key)? {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
    }

    pub fn get_attribute(&self, key: &str) -> Option<Arc<Attribute>> {
        self.attribute_ref(key).and_then(|cell| cell.attribute())
    }

    pub fn attribute_ref(&self, key: &str) -> Option<Arc<AttributeRef>> {
        let state = lock(&self.state);
        state
            .by_key
            .get(key)
            .map(|&slot| state.refs[slot].clone())
    }

    /// Live attributes, without the internal linkage keys.
    pub fn attributes(&self) -> Vec<Arc<Attribute>> {
        self.live_attributes()
            .into_iter()
            .filter(|a| !self.config.is_hidden(a.key()))
            .collect()
    }

    /// Live attributes, internal linkage keys included.
    pub fn attributes_with_internal(&self) -> Vec<Arc<Attribute>> {
        self.live_attributes()
    }

    fn live_attributes(&self) -> Vec<Arc<Attribute>> {
        let refs = lock(&self.state).refs.clone();
        refs.iter().filter_map(|cell| cell.attribute()).collect()
    }

    /// Connection this scope was mirrored through.
    pub fn conn(&self) -> Result<Conn> {
        self.conn
            .upgrade()
            .map(Conn::from_shared)
            .ok_or(CacheError::NotConnected)
    }

    /// Get the settled attribute of `key` after every boundary that changes it.
    pub fn subscribe(
        &self,
        key: &str,
        on_value: impl Fn(&Option<Arc<Attribute>>) + Send + Sync + 'static,
    ) -> Result<Unsubscriber> {
        Ok(self.subscribable_ref(key)?.subscribe(on_value))
    }

    pub fn subscribe_with_invalidate(
        &self,
        key: &str,
        on_value: impl Fn(&Option<Arc<Attribute>>) + Send + Sync + 'static,
        on_invalidate: impl Fn(&Option<Arc<Attribute>>) + Send + Sync + 'static,
    ) -> Result<Unsubscriber> {
        Ok(self
            .subscribable_ref(key)?
            .subscribe_with_invalidate(on_value, on_invalidate))
    }

    fn subscribable_ref(&self, key: &str) -> Result<Arc<AttributeRef>> {
        self.conn()?;
        self.attribute_ref(key)
            .ok_or_else(|| CacheError::UnknownAttribute {
                scope_id: self.id.clone(),
                key: key.to_string(),
            })
    }

    /// Take one attribute event for this scope.
    pub(crate) fn ingest(&self, edge: AttributeEdge) {
        let intake = {
            let mut state = lock(&self.state);

            // Only a real change makes the scope not-ready.
            match state.by_id.get(&edge.id).copied() {
                Some(slot) if edge.is_deleted() => {
                    if state.by_key.get(&edge.key) == Some(&slot) {
                        state.by_key.remove(&edge.key);
                    }
                    let cell = state.refs[slot].clone();
                    if cell.is_deleted() {
                        Intake::Nothing
                    } else {
                        state.ready = false;
                        state.record(&cell);
                        Intake::Delete(cell)
                    }
                }
                None if edge.is_deleted() => {
                    trace!(scope = %self.id, attribute = %edge.id, "delete for unseen attribute");
                    Intake::Nothing
                }
                Some(slot) => {
                    let cell = state.refs[slot].clone();
                    if cell.is_deleted() {
                        warn!(
                            scope = %self.id,
                            attribute = %edge.id,
                            "ignoring update for deleted attribute"
                        );
                        Intake::Nothing
                    } else {
                        state.ready = false;
                        state.by_key.insert(edge.key.clone(), slot);
                        state.record(&cell);
                        Intake::Replace(cell, edge)
                    }
                }
                None => {
                    state.ready = false;
                    let slot = state.refs.len();
                    state.by_id.insert(edge.id.clone(), slot);
                    state.by_key.insert(edge.key.clone(), slot);
                    state.refs.push(Arc::new(AttributeRef::new(edge)));
                    Intake::Nothing
                }
            }
        };

        // Subscribers run outside the scope lock.
        match intake {
            Intake::Delete(cell) => cell.mark_deleted(),
            Intake::Replace(cell, edge) => {
                cell.set_edge(edge);
            }
            Intake::Nothing => {}
        }
    }

    /// Close the current boundary. Returns `true` if the scope became ready.
    pub(crate) fn end_boundary(&self) -> bool {
        let pending = {
            let mut state = lock(&self.state);
            if state.ready {
                return false;
            }
            state.ready = true;
            std::mem::take(&mut state.pending)
        };

        for cell in pending {
            cell.flush();
        }
        true
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached(id: &str) -> Scope {
        Scope::new(
            id.to_string(),
            Kind::Game,
            Weak::new(),
            Arc::new(CacheConfig::default()),
        )
    }

    fn edge(id: &str, key: &str, value: Value) -> AttributeEdge {
        AttributeEdge::new(id, "g1", key).with_value(value)
    }

    #[test]
    fn test_get_by_key() {
        let scope = detached("g1");
        scope.ingest(edge("a1", "batchID", json!("b1")));
        scope.ingest(edge("a2", "treatment", json!({"size": 2})));

        assert_eq!(scope.get("batchID").unwrap(), Some(json!("b1")));
        assert_eq!(scope.get_str("batchID").unwrap().as_deref(), Some("b1"));
        assert_eq!(scope.get_str("treatment").unwrap(), None);
        assert_eq!(scope.get("missing").unwrap(), None);
    }

    #[test]
    fn test_readiness_cycles_per_boundary() {
        let scope = detached("g1");
        assert!(!scope.is_ready());

        scope.ingest(edge("a1", "status", json!("running")));
        assert!(!scope.is_ready());
        assert!(scope.end_boundary());
        assert!(scope.is_ready());
        assert!(!scope.end_boundary());

        scope.ingest(edge("a1", "status", json!("ended")));
        assert!(!scope.is_ready());
        assert!(scope.end_boundary());
        assert_eq!(scope.get("status").unwrap(), Some(json!("ended")));
    }

    #[test]
    fn test_delete_hides_attribute_and_stays_deleted() {
        let scope = detached("g1");
        scope.ingest(edge("a1", "status", json!("running")));
        scope.end_boundary();

        scope.ingest(AttributeEdge::new("a1", "g1", "status").deleted());
        assert_eq!(scope.get("status").unwrap(), None);
        assert!(scope.attributes().is_empty());

        // Same id again: no resurrection.
        scope.ingest(edge("a1", "status", json!("back")));
        scope.end_boundary();
        assert_eq!(scope.get("status").unwrap(), None);

        // A new attribute id under the same key is a fresh ref.
        scope.ingest(edge("a2", "status", json!("fresh")));
        assert_eq!(scope.get("status").unwrap(), Some(json!("fresh")));
    }

    #[test]
    fn test_ignored_events_keep_scope_ready() {
        let scope = detached("g1");
        scope.ingest(edge("a1", "status", json!("running")));
        scope.ingest(AttributeEdge::new("a2", "g1", "score").deleted());
        scope.end_boundary();

        scope.ingest(AttributeEdge::new("a9", "g1", "unseen").deleted());
        assert!(scope.is_ready());

        scope.ingest(AttributeEdge::new("a1", "g1", "status").deleted());
        assert!(!scope.is_ready());
        scope.end_boundary();

        scope.ingest(edge("a1", "status", json!("back")));
        assert!(scope.is_ready());
        assert!(!scope.end_boundary());
    }

    #[test]
    fn test_attributes_hide_linkage_keys() {
        let scope = detached("g1");
        scope.ingest(edge("a1", "gameID", json!("g1")));
        scope.ingest(edge("a2", "playerGameID-p1", json!("pg1")));
        scope.ingest(edge("a3", "ran-onGameStart", json!(true)));

        let keys: Vec<String> = scope
            .attributes()
            .iter()
            .map(|a| a.key().to_string())
            .collect();
        assert_eq!(keys, vec!["gameID"]);
        assert_eq!(scope.attributes_with_internal().len(), 3);
    }

    #[test]
    fn test_boundary_flushes_changed_refs_once() {
        let scope = detached("g1");
        scope.ingest(edge("a1", "score", json!(1)));
        scope.end_boundary();

        let cell = scope.attribute_ref("score").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _unsub = cell.subscribe(move |attr| {
            let value = attr.as_ref().and_then(|a| a.value().unwrap().cloned());
            s.lock().unwrap().push(value);
        });

        scope.ingest(edge("a1", "score", json!(2)));
        scope.ingest(edge("a1", "score", json!(3)));
        scope.end_boundary();

        assert_eq!(*seen.lock().unwrap(), vec![Some(json!(3))]);
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let scope = detached("g1");
        scope.ingest(edge("a1", "score", json!(1)));

        let err = scope.subscribe("score", |_| {}).unwrap_err();
        assert!(matches!(err, CacheError::NotConnected));
        assert!(err.is_usage());
    }
}
