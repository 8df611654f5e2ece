//! Kind-keyed registry of collections, fed by a transport.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::coll::{CollCore, ScopeColl};
use crate::config::CacheConfig;
use crate::edge::{AttributeUpdate, ScopedAttributesFilter};
use crate::entities::{
    Batch, Game, Player, PlayerGame, PlayerRound, PlayerStage, Round, Stage,
};
use crate::error::{CacheError, Result};
use crate::kind::{Entity, Kind};

/// Source of attribute events.
///
/// Implementations wrap whatever session talks to the authority. Each call to
/// [`scoped_attributes`](Self::scoped_attributes) opens one subscription;
/// reconnection and retry are the transport's business.
pub trait Transport: Send + Sync + 'static {
    fn scoped_attributes(&self, filter: ScopedAttributesFilter) -> BoxStream<'static, AttributeUpdate>;

    /// Tear down the session. Open streams may simply end.
    fn stop(&self);
}

pub(crate) struct ConnShared {
    transport: Arc<dyn Transport>,
    config: Arc<CacheConfig>,
    runtime: Handle,
    colls: [OnceLock<Arc<CollCore>>; Kind::COUNT],
    stop_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

/// A live mirror of every kind the authority streams.
///
/// Collections are created on first access, which is also when their
/// subscription opens. Cloning shares the same collections.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<ConnShared>,
}

impl Conn {
    /// Connection with the default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> ConnBuilder {
        ConnBuilder {
            transport,
            config: CacheConfig::default(),
        }
    }

    pub(crate) fn from_shared(shared: Arc<ConnShared>) -> Self {
        Self { shared }
    }

    pub fn players(&self) -> ScopeColl<Player> {
        self.coll()
    }

    pub fn batches(&self) -> ScopeColl<Batch> {
        self.coll()
    }

    pub fn games(&self) -> ScopeColl<Game> {
        self.coll()
    }

    pub fn rounds(&self) -> ScopeColl<Round> {
        self.coll()
    }

    pub fn stages(&self) -> ScopeColl<Stage> {
        self.coll()
    }

    pub fn player_games(&self) -> ScopeColl<PlayerGame> {
        self.coll()
    }

    pub fn player_rounds(&self) -> ScopeColl<PlayerRound> {
        self.coll()
    }

    pub fn player_stages(&self) -> ScopeColl<PlayerStage> {
        self.coll()
    }

    /// The shared collection for `T`'s kind, subscribing on first access.
    pub fn coll<T: Entity>(&self) -> ScopeColl<T> {
        let core = self.shared.colls[T::KIND.index()].get_or_init(|| self.open(T::KIND));
        ScopeColl::from_core(core.clone())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Stop all subscriptions and the underlying session.
    ///
    /// Collections stay readable with whatever they hold; nothing updates them
    /// afterwards.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.stop_tx.send_replace(true);
        self.shared.transport.stop();
        debug!("connection stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    fn open(&self, kind: Kind) -> Arc<CollCore> {
        let core = Arc::new(CollCore::new(
            kind,
            Arc::downgrade(&self.shared),
            self.shared.config.clone(),
        ));

        if self.is_stopped() {
            warn!(%kind, "collection opened after stop; it will stay empty");
            core.freeze_ready();
            return core;
        }

        debug!(%kind, "subscribing to scoped attributes");
        let mut stream = self
            .shared
            .transport
            .scoped_attributes(ScopedAttributesFilter::kind(kind));
        let mut stop = self.shared.stop_tx.subscribe();
        let feed = core.clone();

        self.shared.runtime.spawn(async move {
            loop {
                // Stop wins over updates already queued on the stream.
                tokio::select! {
                    biased;
                    _ = stop.changed() => {
                        debug!(%kind, "subscription stopped");
                        break;
                    }
                    next = stream.next() => match next {
                        Some(update) => feed.apply(update),
                        None => {
                            debug!(%kind, "subscription stream ended");
                            break;
                        }
                    },
                }
            }
        });

        core
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open: Vec<Kind> = Kind::ALL
            .into_iter()
            .filter(|kind| self.shared.colls[kind.index()].get().is_some())
            .collect();
        f.debug_struct("Conn")
            .field("open", &open)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Builder for [`Conn`].
pub struct ConnBuilder {
    transport: Arc<dyn Transport>,
    config: CacheConfig,
}

impl ConnBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Also hide attribute keys starting with `prefix` from enumeration.
    pub fn hidden_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.hidden_key_prefixes.push(prefix.into());
        self
    }

    pub fn build(self) -> Result<Conn> {
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let (stop_tx, _) = watch::channel(false);

        Ok(Conn {
            shared: Arc::new(ConnShared {
                transport: self.transport,
                config: Arc::new(self.config),
                runtime,
                colls: std::array::from_fn(|_| OnceLock::new()),
                stop_tx,
                stopped: AtomicBool::new(false),
            }),
        })
    }
}
