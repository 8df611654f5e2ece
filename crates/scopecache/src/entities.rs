//! Typed scopes and the relationships between them.
//!
//! Relationships are never stored. Each accessor asks the connection for the
//! related kind's collection and filters it on a foreign-key attribute
//! (`batchID`, `gameID`, `roundID`, `stageID`, `playerID`). Lists are ordered
//! by when the linking attribute was created.

use std::sync::Arc;

use crate::coll::ScopeColl;
use crate::compare::{by_created_at, linked_to};
use crate::define_entity;
use crate::error::Result;
use crate::kind::{Entity, Kind};
use crate::scope::Scope;
use crate::view::{ScopeCollView, ViewKey, ViewSpec};

define_entity! {
    /// A participant.
    Player => Kind::Player
}

define_entity! {
    /// A batch of games.
    Batch => Kind::Batch
}

define_entity! {
    /// One game, belonging to a batch.
    Game => Kind::Game
}

define_entity! {
    /// One round of a game.
    Round => Kind::Round
}

define_entity! {
    /// One stage of a round.
    Stage => Kind::Stage
}

define_entity! {
    /// A player's state within one game.
    PlayerGame => Kind::PlayerGame
}

define_entity! {
    /// A player's state within one round.
    PlayerRound => Kind::PlayerRound
}

define_entity! {
    /// A player's state within one stage.
    PlayerStage => Kind::PlayerStage
}

async fn linked<T: Entity>(coll: ScopeColl<T>, field: &str, owner_id: &str) -> Vec<T> {
    coll.get_sorted_filtered(by_created_at(field), Some(linked_to(field, owner_id)))
        .await
}

async fn sub_linked<T: Entity>(
    coll: ScopeColl<T>,
    owner: &Scope,
    name: &str,
    field: &str,
) -> Arc<ScopeCollView<T>> {
    let spec = ViewSpec::new(ViewKey::relation(owner.kind(), owner.id(), name))
        .sort_by(by_created_at(field))
        .filter(linked_to(field, owner.id()))
        .watch([field]);
    coll.view(spec).await
}

fn parent<T: Entity>(coll: ScopeColl<T>, child: &Scope, field: &str) -> Result<Option<T>> {
    Ok(child.get_str(field)?.and_then(|id| coll.get(&id)))
}

fn for_player<T: Entity>(entries: Vec<T>, player_id: &str) -> Result<Option<T>> {
    for entry in entries {
        if entry.scope().get_str("playerID")?.as_deref() == Some(player_id) {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

impl Batch {
    pub async fn games(&self) -> Result<Vec<Game>> {
        Ok(linked(self.conn()?.games(), "batchID", self.id()).await)
    }

    pub async fn sub_games(&self) -> Result<Arc<ScopeCollView<Game>>> {
        Ok(sub_linked(self.conn()?.games(), self, "games", "batchID").await)
    }
}

impl Game {
    pub fn batch(&self) -> Result<Option<Batch>> {
        parent(self.conn()?.batches(), self, "batchID")
    }

    /// The game's per-player entries.
    pub async fn players(&self) -> Result<Vec<PlayerGame>> {
        self.player_games().await
    }

    pub async fn sub_players(&self) -> Result<Arc<ScopeCollView<PlayerGame>>> {
        self.sub_player_games().await
    }

    pub async fn player_games(&self) -> Result<Vec<PlayerGame>> {
        Ok(linked(self.conn()?.player_games(), "gameID", self.id()).await)
    }

    pub async fn sub_player_games(&self) -> Result<Arc<ScopeCollView<PlayerGame>>> {
        Ok(sub_linked(self.conn()?.player_games(), self, "playerGames", "gameID").await)
    }

    pub async fn player_game(&self, player_id: &str) -> Result<Option<PlayerGame>> {
        for_player(self.player_games().await?, player_id)
    }

    pub async fn rounds(&self) -> Result<Vec<Round>> {
        Ok(linked(self.conn()?.rounds(), "gameID", self.id()).await)
    }

    pub async fn sub_rounds(&self) -> Result<Arc<ScopeCollView<Round>>> {
        Ok(sub_linked(self.conn()?.rounds(), self, "rounds", "gameID").await)
    }
}

impl Round {
    pub fn batch(&self) -> Result<Option<Batch>> {
        parent(self.conn()?.batches(), self, "batchID")
    }

    pub fn game(&self) -> Result<Option<Game>> {
        parent(self.conn()?.games(), self, "gameID")
    }

    pub async fn stages(&self) -> Result<Vec<Stage>> {
        Ok(linked(self.conn()?.stages(), "roundID", self.id()).await)
    }

    pub async fn sub_stages(&self) -> Result<Arc<ScopeCollView<Stage>>> {
        Ok(sub_linked(self.conn()?.stages(), self, "stages", "roundID").await)
    }

    pub async fn player_rounds(&self) -> Result<Vec<PlayerRound>> {
        Ok(linked(self.conn()?.player_rounds(), "roundID", self.id()).await)
    }

    pub async fn sub_player_rounds(&self) -> Result<Arc<ScopeCollView<PlayerRound>>> {
        Ok(sub_linked(self.conn()?.player_rounds(), self, "playerRounds", "roundID").await)
    }

    pub async fn player_round(&self, player_id: &str) -> Result<Option<PlayerRound>> {
        for_player(self.player_rounds().await?, player_id)
    }
}

impl Stage {
    pub fn round(&self) -> Result<Option<Round>> {
        parent(self.conn()?.rounds(), self, "roundID")
    }

    pub async fn player_stages(&self) -> Result<Vec<PlayerStage>> {
        Ok(linked(self.conn()?.player_stages(), "stageID", self.id()).await)
    }

    pub async fn sub_player_stages(&self) -> Result<Arc<ScopeCollView<PlayerStage>>> {
        Ok(sub_linked(self.conn()?.player_stages(), self, "playerStages", "stageID").await)
    }

    pub async fn player_stage(&self, player_id: &str) -> Result<Option<PlayerStage>> {
        for_player(self.player_stages().await?, player_id)
    }
}

impl PlayerGame {
    pub fn player(&self) -> Result<Option<Player>> {
        parent(self.conn()?.players(), self, "playerID")
    }

    pub fn game(&self) -> Result<Option<Game>> {
        parent(self.conn()?.games(), self, "gameID")
    }
}

impl PlayerRound {
    pub fn player(&self) -> Result<Option<Player>> {
        parent(self.conn()?.players(), self, "playerID")
    }
}

impl PlayerStage {
    pub fn player(&self) -> Result<Option<Player>> {
        parent(self.conn()?.players(), self, "playerID")
    }
}
