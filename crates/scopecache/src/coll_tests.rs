//! Behaviour of collections and views fed directly through `apply`.

use crate::compare::{by_created_at, by_id, linked_to, Comparator, Filter};
use crate::{AttributeEdge, AttributeUpdate, Game, PlayerGame, Scope, ScopeColl, ViewSpec};
use chrono::{TimeZone, Utc};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn set(attr_id: &str, scope_id: &str, key: &str, value: Value) -> AttributeUpdate {
    AttributeUpdate::edge(
        AttributeEdge::new(attr_id, scope_id, key).with_value(value),
        false,
    )
}

fn set_at(attr_id: &str, scope_id: &str, key: &str, value: Value, secs: i64) -> AttributeUpdate {
    AttributeUpdate::edge(
        AttributeEdge::new(attr_id, scope_id, key)
            .with_value(value)
            .created_at(Utc.timestamp_opt(secs, 0).unwrap()),
        false,
    )
}

fn ids<T: std::ops::Deref<Target = crate::Scope>>(scopes: &[T]) -> Vec<String> {
    scopes.iter().map(|s| s.id().to_string()).collect()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Vec<Game>) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (count, move |_: &Vec<Game>| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

async fn ready_games() -> ScopeColl<Game> {
    let games = ScopeColl::<Game>::detached();
    games.apply(set("a1", "g1", "status", json!("created")));
    games.apply(set("a2", "g2", "status", json!("created")));
    games.apply(AttributeUpdate::boundary());
    games.wait_ready().await;
    games
}

// ============================================================================
// Readiness
// ============================================================================

#[test]
fn test_lazy_materialization() {
    let games = ScopeColl::<Game>::detached();
    assert!(games.get("g1").is_none());

    games.apply(set("a1", "g1", "batchID", json!("b1")));

    let game = games.get("g1").expect("scope created mid-boundary");
    assert!(!game.is_ready());
    assert!(!games.is_ready());
    assert_eq!(game.get("batchID").unwrap(), Some(json!("b1")));
}

#[test]
fn test_sorted_suspends_until_first_boundary() {
    let games = ScopeColl::<Game>::detached();
    games.apply(set("a1", "g1", "batchID", json!("b1")));

    assert!(games.sorted().now_or_never().is_none());

    games.apply(AttributeUpdate::boundary());

    let sorted = games.sorted().now_or_never().expect("ready after boundary");
    assert_eq!(ids(&sorted), vec!["g1"]);
    assert!(sorted[0].is_ready());
}

#[tokio::test]
async fn test_pending_reads_resolve_once_ready() {
    let games = ScopeColl::<Game>::detached();

    let mut readers = Vec::new();
    for _ in 0..5 {
        let games = games.clone();
        readers.push(tokio::spawn(async move { games.all().await.len() }));
    }
    tokio::task::yield_now().await;

    games.apply(set("a1", "g1", "status", json!("created")));
    games.apply(set("a2", "g2", "status", json!("created")));
    games.apply(AttributeUpdate::boundary());

    for reader in readers {
        let len = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader released")
            .unwrap();
        assert_eq!(len, 2);
    }

    // Readiness latches: later boundaries with changes never un-ready it.
    games.apply(set("a3", "g3", "status", json!("created")));
    assert!(games.is_ready());
    assert!(games.all().now_or_never().is_some());
}

#[test]
fn test_boundary_with_done_on_event() {
    let games = ScopeColl::<Game>::detached();
    games.apply(AttributeUpdate::edge(
        AttributeEdge::new("a1", "g1", "status").with_value(json!("created")),
        true,
    ));

    assert!(games.is_ready());
    assert!(games.get("g1").unwrap().is_ready());
    assert_eq!(games.boundaries(), 1);
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_snapshots_are_copies() {
    let games = ready_games().await;

    let mut snapshot = games.sorted().await;
    snapshot.clear();

    assert_eq!(games.sorted().await.len(), 2);
    assert_eq!(games.len(), 2);
}

#[tokio::test]
async fn test_sorted_filtered() {
    let games = ScopeColl::<Game>::detached();
    games.apply(set_at("a1", "g1", "batchID", json!("b1"), 30));
    games.apply(set_at("a2", "g2", "batchID", json!("b2"), 10));
    games.apply(set_at("a3", "g3", "batchID", json!("b1"), 20));
    games.apply(AttributeUpdate::boundary());

    let reversed: Comparator = Arc::new(|a: &crate::Scope, b: &crate::Scope| b.id().cmp(a.id()));
    assert_eq!(ids(&games.get_sorted(reversed).await), vec!["g3", "g2", "g1"]);

    let in_b1 = games
        .get_sorted_filtered(by_created_at("batchID"), Some(linked_to("batchID", "b1")))
        .await;
    assert_eq!(ids(&in_b1), vec!["g3", "g1"]);

    let map = games.map().await;
    assert_eq!(map.len(), 3);
    assert_eq!(map["g2"].get_str("batchID").unwrap().as_deref(), Some("b2"));
}

#[tokio::test]
async fn test_all_keeps_discovery_order() {
    let games = ScopeColl::<Game>::detached();
    for id in ["g9", "g1", "g5"] {
        games.apply(set(&format!("{id}-a"), id, "status", json!("created")));
    }
    games.apply(AttributeUpdate::boundary());

    assert_eq!(ids(&games.all().await), vec!["g9", "g1", "g5"]);
    assert_eq!(ids(&games.sorted().await), vec!["g1", "g5", "g9"]);
}

// ============================================================================
// Views
// ============================================================================

#[tokio::test]
async fn test_view_memoized_by_key() {
    let games = ready_games().await;
    let cmp = by_id();

    let a = games.sub_sorted("by-status", cmp.clone(), ["status"]).await;
    let b = games.sub_sorted("by-status", cmp.clone(), ["status"]).await;
    assert!(Arc::ptr_eq(&a, &b));

    // Identical comparator and fields under another key is another view.
    let c = games.sub_sorted("by-status-2", cmp, ["status"]).await;
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(ids(&c.current()), vec!["g1", "g2"]);
}

#[tokio::test]
async fn test_dirty_keys_coalesce() {
    let games = ready_games().await;
    let view = games.sub_sorted("status", by_id(), ["status"]).await;
    let (count, on_value) = counter();
    let _unsub = view.subscribe(on_value);

    games.apply(set("a1", "g1", "status", json!("running")));
    games.apply(set("a1", "g1", "status", json!("ended")));
    games.apply(set("a2", "g2", "status", json!("running")));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    games.apply(AttributeUpdate::boundary());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // A bare boundary with nothing dirty recomputes nothing.
    games.apply(AttributeUpdate::boundary());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_field_set_isolation() {
    let games = ready_games().await;
    let view = games.sub_sorted("watch-a", by_id(), ["a"]).await;
    let (count, on_value) = counter();
    let _unsub = view.subscribe(on_value);

    games.apply(set("b1", "g1", "b", json!(1)));
    games.apply(AttributeUpdate::boundary());
    assert_eq!(count.load(Ordering::SeqCst), 0);

    games.apply(set("a1", "g1", "a", json!(1)));
    games.apply(set("b1", "g1", "b", json!(2)));
    games.apply(AttributeUpdate::boundary());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_view_without_fields_is_one_shot() {
    let games = ready_games().await;
    let view = games.view(ViewSpec::new("snapshot")).await;
    let (count, on_value) = counter();
    let _unsub = view.subscribe(on_value);

    games.apply(set("a9", "g9", "status", json!("created")));
    games.apply(AttributeUpdate::boundary());

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(ids(&view.current()), vec!["g1", "g2"]);
}

#[tokio::test]
async fn test_view_tracks_membership() {
    let games = ScopeColl::<Game>::detached();
    games.apply(set_at("a1", "g1", "batchID", json!("b1"), 10));
    games.apply(AttributeUpdate::boundary());

    let view = games
        .sub_sorted_filtered(
            "batch/b1/games",
            by_created_at("batchID"),
            linked_to("batchID", "b1"),
            ["batchID"],
        )
        .await;
    assert_eq!(ids(&view.current()), vec!["g1"]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _unsub = view.subscribe(move |games: &Vec<Game>| s.lock().unwrap().push(ids(games)));

    games.apply(set_at("a2", "g2", "batchID", json!("b1"), 5));
    games.apply(set_at("a3", "g3", "batchID", json!("b2"), 1));
    games.apply(AttributeUpdate::boundary());

    games.apply(AttributeUpdate::edge(
        AttributeEdge::new("a1", "g1", "batchID").deleted(),
        true,
    ));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec!["g2".to_string(), "g1".to_string()], vec!["g2".to_string()]]
    );
}

#[tokio::test]
async fn test_view_invalidates_once_per_boundary() {
    let games = ready_games().await;
    let view = games.sub_sorted("status", by_id(), ["status"]).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let v = events.clone();
    let i = events.clone();
    let _unsub = view.subscribe_with_invalidate(
        move |_: &Vec<Game>| v.lock().unwrap().push("value"),
        move |_: &Vec<Game>| i.lock().unwrap().push("invalidate"),
    );

    games.apply(set("a1", "g1", "status", json!("running")));
    games.apply(set("a2", "g2", "status", json!("running")));
    games.apply(set("x1", "g1", "unwatched", json!(0)));
    games.apply(AttributeUpdate::boundary());

    assert_eq!(*events.lock().unwrap(), vec!["invalidate", "value"]);
}

#[tokio::test]
async fn test_unsubscribe_stops_view_notifications() {
    let games = ready_games().await;
    let view = games.sub_sorted("status", by_id(), ["status"]).await;
    let (count, on_value) = counter();
    let unsub = view.subscribe(on_value);

    games.apply(set("a1", "g1", "status", json!("running")));
    games.apply(AttributeUpdate::boundary());
    unsub.unsubscribe();

    games.apply(set("a1", "g1", "status", json!("ended")));
    games.apply(AttributeUpdate::boundary());

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(
        view.current()[0].get("status").unwrap(),
        Some(json!("ended"))
    );
}

#[tokio::test]
async fn test_subscriber_may_read_collection() {
    let players = ScopeColl::<PlayerGame>::detached();
    players.apply(set("a1", "pg1", "gameID", json!("g1")));
    players.apply(AttributeUpdate::boundary());

    let view = players.sub_sorted("all", by_id(), ["gameID"]).await;
    let lens = Arc::new(Mutex::new(Vec::new()));
    let reader = players.clone();
    let l = lens.clone();
    let _unsub = view.subscribe(move |snapshot: &Vec<PlayerGame>| {
        l.lock().unwrap().push((snapshot.len(), reader.len()));
    });

    players.apply(set("a2", "pg2", "gameID", json!("g1")));
    players.apply(AttributeUpdate::boundary());

    assert_eq!(*lens.lock().unwrap(), vec![(2, 2)]);
}

#[test]
fn test_boundary_during_first_view_computation() {
    let games = ScopeColl::<Game>::detached();
    games.apply(set("a1", "g1", "batchID", json!("b1")));
    games.apply(AttributeUpdate::boundary());

    // The first filter call parks until the test has applied another boundary.
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Mutex::new(Some(release_rx));
    let in_b1 = linked_to("batchID", "b1");
    let filter: Filter = Arc::new(move |scope: &Scope| {
        if let Some(release) = release_rx.lock().unwrap().take() {
            entered_tx.send(()).unwrap();
            release.recv().unwrap();
        }
        in_b1(scope)
    });

    let builder = {
        let games = games.clone();
        std::thread::spawn(move || {
            futures::executor::block_on(games.sub_sorted_filtered(
                "batch/b1/games",
                by_id(),
                filter,
                ["batchID"],
            ))
        })
    };

    entered_rx.recv().unwrap();
    games.apply(set("a2", "g2", "batchID", json!("b1")));
    games.apply(AttributeUpdate::boundary());
    release_tx.send(()).unwrap();

    let view = builder.join().unwrap();
    assert_eq!(ids(&view.current()), vec!["g1", "g2"]);

    // Registered as well: later boundaries still reach it.
    games.apply(set("a3", "g3", "batchID", json!("b1")));
    games.apply(AttributeUpdate::boundary());
    assert_eq!(ids(&view.current()), vec!["g1", "g2", "g3"]);
}
