//! The collection of all scopes of one kind.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

use crate::compare::{by_id, Comparator, Filter};
use crate::config::CacheConfig;
use crate::conn::ConnShared;
use crate::edge::AttributeUpdate;
use crate::kind::{Entity, Kind};
use crate::lock;
use crate::readiness::ReadyGate;
use crate::scope::Scope;
use crate::view::{Fields, ScopeCollView, ViewKey, ViewSpec};

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Views are memoized per entity type: two handle types over one kind may
/// use the same key without sharing a view.
type ViewSlot = (TypeId, ViewKey);

/// How the collection reaches a registered view.
struct ViewTrigger {
    slot: ViewSlot,
    fields: Fields,
    invalidate: Hook,
    recompute: Hook,
}

impl ViewTrigger {
    fn watches(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f == key)
    }

    fn intersects(&self, dirty: &HashSet<String>) -> bool {
        self.fields.iter().any(|f| dirty.contains(f))
    }
}

struct CollState {
    /// Scopes in discovery order.
    scopes: Vec<Arc<Scope>>,
    index: HashMap<String, usize>,
    /// Slots of scopes that received events since the last boundary.
    touched: BTreeSet<usize>,
    /// Keys changed since the last boundary.
    dirty: HashSet<String>,
    /// Views already invalidated in the current boundary.
    invalidated: HashSet<ViewSlot>,
    views: HashMap<ViewSlot, Arc<dyn Any + Send + Sync>>,
    triggers: Vec<ViewTrigger>,
    boundaries: u64,
}

/// Untyped machinery shared by every [`ScopeColl`] handle of one kind.
pub(crate) struct CollCore {
    kind: Kind,
    conn: Weak<ConnShared>,
    config: Arc<CacheConfig>,
    gate: ReadyGate,
    state: Mutex<CollState>,
}

impl CollCore {
    pub fn new(kind: Kind, conn: Weak<ConnShared>, config: Arc<CacheConfig>) -> Self {
        Self {
            kind,
            conn,
            config,
            gate: ReadyGate::new(),
            state: Mutex::new(CollState {
                scopes: Vec::new(),
                index: HashMap::new(),
                touched: BTreeSet::new(),
                dirty: HashSet::new(),
                invalidated: HashSet::new(),
                views: HashMap::new(),
                triggers: Vec::new(),
                boundaries: 0,
            }),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    /// Latch readiness without data. Used for kinds first touched after stop.
    pub fn freeze_ready(&self) {
        self.gate.open();
    }

    pub fn get(&self, id: &str) -> Option<Arc<Scope>> {
        let state = lock(&self.state);
        state.index.get(id).map(|&slot| state.scopes[slot].clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.state).scopes.len()
    }

    pub fn boundaries(&self) -> u64 {
        lock(&self.state).boundaries
    }

    pub fn scopes(&self) -> Vec<Arc<Scope>> {
        lock(&self.state).scopes.clone()
    }

    pub fn sorted_filtered<T: Entity>(&self, compare: &Comparator, filter: Option<&Filter>) -> Vec<T> {
        let mut scopes = self.scopes();
        if let Some(filter) = filter {
            scopes.retain(|scope| filter(scope));
        }
        scopes.sort_by(|a, b| compare(a, b));
        scopes.into_iter().map(T::from_scope).collect()
    }

    /// Fold one stream item into the collection.
    pub fn apply(&self, update: AttributeUpdate) {
        let AttributeUpdate { attribute, done } = update;

        if let Some(edge) = attribute {
            let (scope, invalidations) = {
                let mut state = lock(&self.state);
                let slot = match state.index.get(edge.scope_id()) {
                    Some(&slot) => slot,
                    None => {
                        let slot = state.scopes.len();
                        trace!(kind = %self.kind, scope = %edge.scope_id(), "scope discovered");
                        state.scopes.push(Arc::new(Scope::new(
                            edge.scope_id().to_string(),
                            self.kind,
                            self.conn.clone(),
                            self.config.clone(),
                        )));
                        state.index.insert(edge.scope_id().to_string(), slot);
                        slot
                    }
                };
                state.touched.insert(slot);

                let mut invalidations = Vec::new();
                if state.dirty.insert(edge.key.clone()) {
                    let CollState {
                        triggers,
                        invalidated,
                        ..
                    } = &mut *state;
                    for trigger in triggers.iter() {
                        if !invalidated.contains(&trigger.slot) && trigger.watches(&edge.key) {
                            invalidated.insert(trigger.slot.clone());
                            invalidations.push(trigger.invalidate.clone());
                        }
                    }
                }

                (state.scopes[slot].clone(), invalidations)
            };

            trace!(
                kind = %self.kind,
                scope = %scope.id(),
                attribute = %edge.id,
                key = %edge.key,
                deleted = edge.is_deleted(),
                done,
                "attribute event"
            );
            scope.ingest(edge);
            for invalidate in invalidations {
                invalidate();
            }
        }

        if done {
            self.end_boundary();
        }
    }

    fn end_boundary(&self) {
        let (scopes, recompute) = {
            let mut state = lock(&self.state);
            state.boundaries += 1;

            let touched = std::mem::take(&mut state.touched);
            let scopes: Vec<Arc<Scope>> = touched
                .into_iter()
                .map(|slot| state.scopes[slot].clone())
                .collect();

            let recompute: Vec<Hook> = if state.dirty.is_empty() {
                Vec::new()
            } else {
                state
                    .triggers
                    .iter()
                    .filter(|trigger| trigger.intersects(&state.dirty))
                    .map(|trigger| trigger.recompute.clone())
                    .collect()
            };
            state.dirty.clear();
            state.invalidated.clear();

            (scopes, recompute)
        };

        if self.gate.open() {
            debug!(kind = %self.kind, scopes = self.len(), "collection ready");
        }
        for scope in scopes {
            scope.end_boundary();
        }
        for trigger in recompute {
            trigger();
        }
    }

    /// Memoized view for `spec.key`, built on first request.
    pub async fn view<T: Entity>(self: &Arc<Self>, spec: ViewSpec) -> Arc<ScopeCollView<T>> {
        self.gate.wait().await;

        let slot: ViewSlot = (TypeId::of::<T>(), spec.key.clone());
        if let Some(existing) = self.memoized::<T>(&slot) {
            return existing;
        }

        // Built outside the lock: the first computation reads the collection.
        // A boundary that ends meanwhile would never reach the unregistered
        // trigger, so recompute until the count is stable under the lock.
        let mut seen = self.boundaries();
        let view = Arc::new(ScopeCollView::<T>::new(self, spec.clone()));
        let mut state = loop {
            let state = lock(&self.state);
            if state.boundaries == seen {
                break state;
            }
            seen = state.boundaries;
            drop(state);
            trace!(kind = %self.kind, view = %spec.key, "boundary during first computation");
            view.refresh();
        };

        if let Some(existing) = state.views.get(&slot) {
            if let Ok(existing) = existing.clone().downcast::<ScopeCollView<T>>() {
                return existing;
            }
        }

        debug!(kind = %self.kind, view = %spec.key, fields = ?spec.fields, "view registered");
        let weak: Weak<ScopeCollView<T>> = Arc::downgrade(&view);
        let invalidate: Hook = {
            let weak = weak.clone();
            Arc::new(move || {
                if let Some(view) = weak.upgrade() {
                    view.invalidate();
                }
            })
        };
        let recompute: Hook = Arc::new(move || {
            if let Some(view) = weak.upgrade() {
                view.recompute();
            }
        });

        state.triggers.push(ViewTrigger {
            slot: slot.clone(),
            fields: spec.fields,
            invalidate,
            recompute,
        });
        state.views.insert(slot, view.clone());
        view
    }

    fn memoized<T: Entity>(&self, slot: &ViewSlot) -> Option<Arc<ScopeCollView<T>>> {
        let existing = lock(&self.state).views.get(slot)?.clone();
        existing.downcast::<ScopeCollView<T>>().ok()
    }
}

/// All scopes of one kind, as handles of type `T`.
///
/// Cloning is cheap; clones share the same underlying collection.
pub struct ScopeColl<T> {
    core: Arc<CollCore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for ScopeColl<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> ScopeColl<T> {
    /// A collection not wired to any connection, fed through [`apply`](Self::apply).
    ///
    /// Scopes in it report [`NotConnected`](crate::CacheError::NotConnected)
    /// for operations that need a connection.
    pub fn detached() -> Self {
        Self::with_config(Arc::new(CacheConfig::default()))
    }

    pub fn with_config(config: Arc<CacheConfig>) -> Self {
        Self::from_core(Arc::new(CollCore::new(T::KIND, Weak::new(), config)))
    }

    pub(crate) fn from_core(core: Arc<CollCore>) -> Self {
        Self {
            core,
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> Kind {
        self.core.kind()
    }

    /// Non-blocking lookup. `None` only means the id has not been seen yet.
    pub fn get(&self, id: &str) -> Option<T> {
        self.core.get(id).map(T::from_scope)
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the first full synchronization pass has completed.
    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    /// Number of done-boundaries received so far.
    pub fn boundaries(&self) -> u64 {
        self.core.boundaries()
    }

    /// Suspend until the first done-boundary. Never suspends afterwards.
    pub async fn wait_ready(&self) {
        self.core.gate.wait().await;
    }

    /// Every scope, in discovery order.
    pub async fn all(&self) -> Vec<T> {
        self.wait_ready().await;
        self.core.scopes().into_iter().map(T::from_scope).collect()
    }

    pub async fn map(&self) -> HashMap<String, T> {
        self.wait_ready().await;
        self.core
            .scopes()
            .into_iter()
            .map(|scope| (scope.id().to_string(), T::from_scope(scope)))
            .collect()
    }

    /// Every scope, ordered by id.
    pub async fn sorted(&self) -> Vec<T> {
        self.get_sorted(by_id()).await
    }

    pub async fn get_sorted(&self, compare: Comparator) -> Vec<T> {
        self.get_sorted_filtered(compare, None).await
    }

    pub async fn get_sorted_filtered(&self, compare: Comparator, filter: Option<Filter>) -> Vec<T> {
        self.wait_ready().await;
        self.core.sorted_filtered(&compare, filter.as_ref())
    }

    pub async fn sub_sorted<I, S>(
        &self,
        key: impl Into<ViewKey>,
        compare: Comparator,
        fields: I,
    ) -> Arc<ScopeCollView<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.view(ViewSpec::new(key).sort_by(compare).watch(fields))
            .await
    }

    pub async fn sub_sorted_filtered<I, S>(
        &self,
        key: impl Into<ViewKey>,
        compare: Comparator,
        filter: Filter,
        fields: I,
    ) -> Arc<ScopeCollView<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.view(
            ViewSpec::new(key)
                .sort_by(compare)
                .filter(filter)
                .watch(fields),
        )
        .await
    }

    /// The view registered under `spec.key`, created if needed.
    pub async fn view(&self, spec: ViewSpec) -> Arc<ScopeCollView<T>> {
        self.core.view(spec).await
    }

    /// Feed one stream item. Connections do this from their subscription task.
    pub fn apply(&self, update: AttributeUpdate) {
        self.core.apply(update);
    }
}

impl<T> fmt::Debug for ScopeColl<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeColl")
            .field("kind", &self.core.kind)
            .field("ready", &self.core.is_ready())
            .finish()
    }
}
