//! Closed set of entity kinds and the typed-handle trait.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// Every kind of scope the authority streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
    Player,
    Batch,
    Game,
    Round,
    Stage,
    PlayerGame,
    PlayerRound,
    PlayerStage,
}

impl Kind {
    pub const COUNT: usize = 8;

    pub const ALL: [Kind; Kind::COUNT] = [
        Kind::Player,
        Kind::Batch,
        Kind::Game,
        Kind::Round,
        Kind::Stage,
        Kind::PlayerGame,
        Kind::PlayerRound,
        Kind::PlayerStage,
    ];

    /// Kind name as used by the authority.
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Player => "player",
            Kind::Batch => "batch",
            Kind::Game => "game",
            Kind::Round => "round",
            Kind::Stage => "stage",
            Kind::PlayerGame => "playerGame",
            Kind::PlayerRound => "playerRound",
            Kind::PlayerStage => "playerStage",
        }
    }

    /// Slot of this kind in per-kind tables.
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed handle over a [`Scope`] of one [`Kind`].
///
/// Handles are cheap to clone; they all point at the single scope owned by
/// the collection.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: Kind;

    fn from_scope(scope: Arc<Scope>) -> Self;

    fn scope(&self) -> &Arc<Scope>;
}
