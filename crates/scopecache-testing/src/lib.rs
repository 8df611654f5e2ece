//! Testing utilities for scopecache.
//!
//! - [`MemoryTransport`]: a [`Transport`] whose streams are fed by the test
//! - [`MemoryAuthority`]: an [`Authority`] handing out sessions over one transport
//! - [`EdgeFactory`]: attribute edges with generated ids and increasing timestamps
//! - [`ViewWatcher`]: awaits the next snapshot of a view
//!
//! ```ignore
//! let transport = MemoryTransport::new();
//! let conn = Conn::new(transport.clone())?;
//! let edges = EdgeFactory::new();
//!
//! transport.send(Kind::Game, edges.set("g1", "batchID", json!("b1")));
//! transport.done(Kind::Game);
//!
//! let games = conn.games().sorted().await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::{self, BoxStream, StreamExt};
use scopecache_core::{
    Authority, AttributeEdge, AttributeUpdate, Entity, Kind, ScopeCollView, ScopedAttributesFilter,
    Transport,
};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

// ============================================================================
// Transport
// ============================================================================

struct Channel {
    tx: UnboundedSender<AttributeUpdate>,
    rx: Option<UnboundedReceiver<AttributeUpdate>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx: Some(rx) }
    }
}

/// In-memory transport. Updates sent before a kind is subscribed are buffered.
#[derive(Default)]
pub struct MemoryTransport {
    channels: Mutex<HashMap<Kind, Channel>>,
    subscriptions: Mutex<Vec<ScopedAttributesFilter>>,
    stopped: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue one update on `kind`'s stream.
    pub fn send(&self, kind: Kind, update: AttributeUpdate) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.entry(kind).or_insert_with(Channel::new);
        // The receiver is gone once a subscription ended; tests may still send.
        let _ = channel.tx.unbounded_send(update);
    }

    /// Queue an attribute event without a boundary.
    pub fn edge(&self, kind: Kind, edge: AttributeEdge) {
        self.send(kind, AttributeUpdate::edge(edge, false));
    }

    /// Queue a bare done-boundary.
    pub fn done(&self, kind: Kind) {
        self.send(kind, AttributeUpdate::boundary());
    }

    /// End `kind`'s stream, as a transport does when its session drops.
    pub fn close(&self, kind: Kind) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.entry(kind).or_insert_with(Channel::new);
        channel.tx.close_channel();
    }

    /// Filters subscribed so far, in order.
    pub fn subscriptions(&self) -> Vec<ScopedAttributesFilter> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn scoped_attributes(&self, filter: ScopedAttributesFilter) -> BoxStream<'static, AttributeUpdate> {
        self.subscriptions.lock().unwrap().push(filter.clone());

        let mut channels = self.channels.lock().unwrap();
        let streams: Vec<_> = filter
            .kinds
            .iter()
            .filter_map(|kind| {
                channels
                    .entry(*kind)
                    .or_insert_with(Channel::new)
                    .rx
                    .take()
            })
            .collect();

        if streams.is_empty() {
            return stream::empty().boxed();
        }
        stream::select_all(streams).boxed()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Authority
// ============================================================================

/// Authority that accepts one service token and serves one transport.
pub struct MemoryAuthority {
    service_token: String,
    transport: Arc<MemoryTransport>,
    registrations: AtomicUsize,
    sessions: Mutex<Vec<String>>,
}

impl MemoryAuthority {
    pub fn new(service_token: impl Into<String>, transport: Arc<MemoryTransport>) -> Self {
        Self {
            service_token: service_token.into(),
            transport,
            registrations: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn transport(&self) -> &Arc<MemoryTransport> {
        &self.transport
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Tokens sessions were opened with, in order.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Authority for MemoryAuthority {
    async fn register_service(&self, client_name: &str, service_token: &str) -> anyhow::Result<String> {
        if service_token != self.service_token {
            anyhow::bail!("invalid service token for {client_name}");
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{client_name}-{}", Uuid::new_v4()))
    }

    async fn session(&self, token: &str) -> anyhow::Result<Arc<dyn Transport>> {
        self.sessions.lock().unwrap().push(token.to_string());
        Ok(self.transport.clone())
    }
}

// ============================================================================
// Edges
// ============================================================================

/// Builds edges with fresh attribute ids and strictly increasing `created_at`.
pub struct EdgeFactory {
    base: DateTime<Utc>,
    tick: AtomicI64,
}

impl Default for EdgeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeFactory {
    pub fn new() -> Self {
        Self {
            base: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            tick: AtomicI64::new(0),
        }
    }

    fn next_time(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::seconds(self.tick.fetch_add(1, Ordering::SeqCst))
    }

    /// A new attribute `key` on `scope_id`.
    pub fn set(&self, scope_id: &str, key: &str, value: Value) -> AttributeEdge {
        self.with_id(&Uuid::new_v4().to_string(), scope_id, key, value)
    }

    /// An edge for a known attribute id: a create the first time, an update after.
    pub fn with_id(&self, attr_id: &str, scope_id: &str, key: &str, value: Value) -> AttributeEdge {
        AttributeEdge::new(attr_id, scope_id, key)
            .with_value(value)
            .created_at(self.next_time())
    }

    /// Deletion of attribute `attr_id`.
    pub fn delete(&self, attr_id: &str, scope_id: &str, key: &str) -> AttributeEdge {
        AttributeEdge::new(attr_id, scope_id, key)
            .created_at(self.next_time())
            .deleted()
    }
}

// ============================================================================
// View watchers
// ============================================================================

/// Forwards every snapshot of a view into a channel the test can await.
pub struct ViewWatcher<T> {
    rx: mpsc::UnboundedReceiver<Vec<T>>,
    _unsub: scopecache_core::Unsubscriber,
}

impl<T: Entity> ViewWatcher<T> {
    pub fn attach(view: &ScopeCollView<T>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let unsub = view.subscribe(move |snapshot: &Vec<T>| {
            let _ = tx.send(snapshot.clone());
        });
        Self { rx, _unsub: unsub }
    }

    /// Next snapshot, failing the test after a second.
    pub async fn next(&mut self) -> Vec<T> {
        tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("view did not publish in time")
            .expect("view watcher closed")
    }

    /// Snapshots published so far and not yet consumed.
    pub fn drain(&mut self) -> Vec<Vec<T>> {
        let mut out = Vec::new();
        while let Ok(snapshot) = self.rx.try_recv() {
            out.push(snapshot);
        }
        out
    }
}

/// Ids of a snapshot, for assertions.
pub fn ids<T: Entity>(snapshot: &[T]) -> Vec<String> {
    snapshot.iter().map(|e| e.scope().id().to_string()).collect()
}

/// Wait until `check` holds, polling the runtime. Fails the test after a second.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
