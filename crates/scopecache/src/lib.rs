//! # Scopecache
//!
//! A reactive local mirror of remotely-authored entity state.
//!
//! The authority streams an unordered, append-only sequence of attribute
//! events (create, update, delete), each owned by a scope of some [`Kind`].
//! Scopecache folds that stream into an in-memory model that can be read,
//! sorted, filtered and subscribed to, without ever re-fetching full state.
//!
//! ## Core Concepts
//!
//! - [`Attribute`] = one keyed value of a scope, decoded lazily
//! - [`Scope`] = one entity (player, batch, game, round, stage, ...)
//! - [`ScopeColl`] = every scope of one kind
//! - [`ScopeCollView`] = a memoized sorted/filtered snapshot of a collection
//! - [`Conn`] = the kind-keyed registry of collections
//!
//! The unit of consistency is the **done-boundary**: the transport marks the
//! end of each synchronization pass, and nothing is announced as settled
//! before it.
//!
//! ## Architecture
//!
//! ```text
//! Transport (authority session)
//!     │
//!     ▼ scoped_attributes(kind)
//! Conn ── one task per kind ──────────────────────┐
//!                                                 │
//!                                                 ▼ apply()
//!                                            ScopeColl
//!     ┌───────────────────────────────────────────┤
//!     │                                           │
//!     ▼ ingest()                                  ▼ dirty keys
//! Scope ─► AttributeRef                       view triggers
//!     │        │                                  │
//!     │        ├─► invalidate (on event)          ├─► invalidate (first dirty key)
//!     │        │                                  │
//!     └─ done ─┴─► notify (settled value)         └─ done ─► recompute + notify
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Boundaries are atomic** - settled values and view snapshots are only
//!    published at done-boundaries
//! 2. **Readiness latches** - a collection is ready after its first boundary
//!    and never goes back; blocking reads wait only for that
//! 3. **Deletion is terminal** - a deleted attribute id never comes back
//! 4. **Dirty keys coalesce** - a view recomputes at most once per boundary,
//!    and only if a key it watches changed
//! 5. **Views are keyed explicitly** - one [`ViewKey`] is one view
//! 6. **Relationships are computed** - typed scopes look up related kinds
//!    through the [`Conn`], nothing is stored
//!
//! ## Example
//!
//! ```ignore
//! use scopecache_core::{connect, FileTokenStore, TokenCache};
//!
//! let cache = TokenCache::new();
//! let token = cache
//!     .retrieve(&authority, &FileTokenStore::cwd(), &service_token, "admin")
//!     .await?;
//! let conn = connect(&authority, &token).await?;
//!
//! for game in conn.games().sorted().await {
//!     let players = game.players().await?;
//!     println!("{} has {} players", game.id(), players.len());
//! }
//!
//! if let Some(game) = conn.games().get("g1") {
//!     let rounds = game.sub_rounds().await?;
//!     let _unsub = rounds.subscribe(|rounds| println!("{} rounds", rounds.len()));
//! }
//! ```
//!
//! ## What This Is Not
//!
//! - A transport: reconnection, retry and authentication live elsewhere
//! - A writer: mutations go through the authority's own API
//! - A history: only the current value of each attribute is kept

use std::sync::{Mutex, MutexGuard, PoisonError};

// Core modules
mod attribute;
mod coll;
mod compare;
mod config;
mod conn;
mod edge;
mod entities;
mod entity_macro;
mod error;
mod kind;
mod readiness;
mod scope;
mod session;
mod subscriber;
mod view;

// Collection behaviour tests (test-only)
#[cfg(test)]
mod coll_tests;


// Re-export data types
pub use attribute::{Attribute, AttributeRef};
pub use edge::{AttributeEdge, AttributeUpdate, NodeRef, ScopedAttributesFilter};
pub use kind::{Entity, Kind};
pub use scope::Scope;

// Re-export collection and view types
pub use coll::ScopeColl;
pub use compare::{by_created_at, by_id, linked_to, Comparator, Filter};
pub use subscriber::Unsubscriber;
pub use view::{ScopeCollView, ViewKey, ViewSpec};

// Re-export typed scopes
pub use entities::{Batch, Game, Player, PlayerGame, PlayerRound, PlayerStage, Round, Stage};

// Re-export connection types
pub use conn::{Conn, ConnBuilder, Transport};
pub use session::{
    connect, connect_with_config, get_token, Authority, FileTokenStore, MemoryTokenStore,
    TokenCache, TokenStore,
};

// Re-export configuration and error types
pub use config::{CacheConfig, DEFAULT_HIDDEN_KEY_PREFIXES};
pub use error::{CacheError, Result};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
