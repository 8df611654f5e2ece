//! # Mirror Dump Example
//!
//! Connects to an in-memory authority, waits for the first synchronization
//! pass and prints what the mirror holds. Then watches one game's rounds
//! while a few more arrive.
//!
//! Run with `RUST_LOG=scopecache_core=debug` to see subscriptions open.

use anyhow::Result;
use scopecache_core::{connect, Kind, MemoryTokenStore, Scope, TokenCache};
use scopecache_testing::{EdgeFactory, MemoryAuthority, MemoryTransport};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const SERVICE_TOKEN: &str = "demo-service-token";

// ============================================================================
// Seed data
// ============================================================================

fn seed(transport: &MemoryTransport, edges: &EdgeFactory) {
    for (id, name) in [("p1", "ada"), ("p2", "grace"), ("p3", "alan")] {
        transport.edge(Kind::Player, edges.set(id, "name", json!(name)));
    }
    transport.done(Kind::Player);

    transport.edge(Kind::Batch, edges.set("b1", "status", json!("running")));
    transport.edge(Kind::Batch, edges.set("b1", "config", json!({"kind": "simple", "count": 2})));
    transport.done(Kind::Batch);

    for game in ["g1", "g2"] {
        transport.edge(Kind::Game, edges.set(game, "batchID", json!("b1")));
        transport.edge(Kind::Game, edges.set(game, "treatment", json!({"playerCount": 2})));
    }
    transport.done(Kind::Game);

    for (pg, game, player) in [("pg1", "g1", "p1"), ("pg2", "g1", "p2"), ("pg3", "g2", "p3")] {
        transport.edge(Kind::PlayerGame, edges.set(pg, "gameID", json!(game)));
        transport.edge(Kind::PlayerGame, edges.set(pg, "playerID", json!(player)));
        // Linkage keys are hidden from attribute listings.
        transport.edge(Kind::Game, edges.set(game, &format!("playerGameID-{player}"), json!(pg)));
    }
    transport.done(Kind::PlayerGame);
    transport.done(Kind::Game);

    transport.done(Kind::Round);
}

// ============================================================================
// Printing
// ============================================================================

fn print_attributes(scope: &Scope, indent: &str) -> Result<()> {
    for attribute in scope.attributes() {
        let value = attribute.value()?.cloned().unwrap_or_default();
        println!("{indent}{} = {}", attribute.key(), value);
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let transport = MemoryTransport::new();
    let authority = MemoryAuthority::new(SERVICE_TOKEN, transport.clone());
    let edges = EdgeFactory::new();
    seed(&transport, &edges);

    let tokens = TokenCache::new();
    let token = tokens
        .retrieve(&authority, &MemoryTokenStore::new(), SERVICE_TOKEN, "mirror-dump")
        .await?;
    let conn = connect(&authority, &token).await?;

    println!("== players");
    for player in conn.players().sorted().await {
        println!("{}", player.id());
        print_attributes(&player, "  ")?;
    }

    println!("== batches");
    for batch in conn.batches().sorted().await {
        println!("{}", batch.id());
        print_attributes(&batch, "  ")?;
    }

    println!("== games");
    conn.players().wait_ready().await;
    for game in conn.games().sorted().await {
        println!("{}", game.id());
        print_attributes(&game, "  ")?;
        for entry in game.players().await? {
            let name = match entry.player()? {
                Some(player) => player.get_str("name")?,
                None => None,
            };
            println!("  player {} ({})", entry.id(), name.unwrap_or_default());
        }
    }

    // Watch g1's rounds while two more arrive.
    let g1 = conn.games().get("g1").ok_or_else(|| anyhow::anyhow!("g1 not mirrored"))?;
    let rounds = g1.sub_rounds().await?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _unsub = rounds.subscribe(move |rounds| {
        let ids: Vec<String> = rounds.iter().map(|r| r.id().to_string()).collect();
        let _ = tx.send(ids);
    });

    for round in ["r1", "r2"] {
        transport.edge(Kind::Round, edges.set(round, "gameID", json!("g1")));
        transport.done(Kind::Round);
        if let Some(ids) = rx.recv().await {
            println!("== g1 rounds: {}", ids.join(", "));
        }
    }

    conn.stop();
    println!("Done.");

    Ok(())
}
