//! Integration tests for the palette document store
//!
//! Runs against a real SQLite file in a temp directory.

use serde_json::json;
use std::collections::HashSet;
use tempfile::TempDir;
use trk_common::events::{EventBus, TrkEvent};
use trk_common::Error;
use trk_host::db::init_database_pool;
use trk_host::models::{
    CanvasDoc, NodeCreate, NodePatch, PaletteCreate, PalettePatch, VersionToken, XY,
};
use trk_host::pagination::{Page, PageQuery};
use trk_host::services::{PaletteStore, SnapshotRef};

/// Test helper: store over a fresh database file
async fn setup_store(temp: &TempDir) -> PaletteStore {
    let pool = init_database_pool(&temp.path().join("trk.db")).await.unwrap();
    PaletteStore::new(pool, EventBus::new(64))
}

fn node(id: &str, x: f64, y: f64) -> NodeCreate {
    NodeCreate {
        id: Some(id.to_string()),
        component: Some("Knob".to_string()),
        position: Some(XY { x, y }),
        ..Default::default()
    }
}

// =============================================================================
// Optimistic concurrency
// =============================================================================

/// A write advances the version; the old version is stale afterwards
#[tokio::test]
async fn test_stale_version_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;

    // Given: a palette at v1
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();
    let v1 = store.read(&id).await.unwrap().version;
    assert_eq!(v1, created.version);

    // When: a write conditioned on v1
    let renamed = store
        .patch(
            &id,
            PalettePatch {
                name: Some("A".to_string()),
                ..Default::default()
            },
            Some(v1),
        )
        .await
        .unwrap();
    let v2 = renamed.version;

    // Then: v2 differs, and v1 no longer writes
    assert_ne!(v1, v2);
    let stale = store
        .patch(
            &id,
            PalettePatch {
                name: Some("B".to_string()),
                ..Default::default()
            },
            Some(v1),
        )
        .await;
    assert!(matches!(stale, Err(Error::Conflict(_))));

    let current = store.read(&id).await.unwrap();
    assert_eq!(current.value.name, "A");
    assert_eq!(current.version, v2);
}

/// Two writers holding the same version: exactly one wins
#[tokio::test]
async fn test_concurrent_conditional_writes_have_one_winner() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();
    let v = created.version;

    let mut tasks = tokio::task::JoinSet::new();
    for name in ["left", "right"] {
        let store = store.clone();
        let id = id.clone();
        tasks.spawn(async move {
            store
                .patch(
                    &id,
                    PalettePatch {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                    Some(v),
                )
                .await
        });
    }

    let mut wins = Vec::new();
    let mut conflicts = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(written) => wins.push(written),
            Err(Error::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(wins.len(), 1);
    assert_eq!(conflicts, 1);
    let current = store.read(&id).await.unwrap();
    assert_eq!(current.version, wins[0].version);
    assert_eq!(current.value.name, wins[0].value.name);
}

/// Unconditional writes all land, each with its own version
#[tokio::test]
async fn test_unconditional_writes_all_apply() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let store = store.clone();
        let id = id.clone();
        tasks.spawn(async move { store.add_node(&id, node(&format!("n{}", i), 0.0, 0.0), None).await });
    }

    let mut versions = HashSet::new();
    while let Some(result) = tasks.join_next().await {
        versions.insert(result.unwrap().unwrap().version);
    }

    assert_eq!(versions.len(), 8);
    let current = store.read(&id).await.unwrap();
    assert_eq!(current.value.nodes.len(), 8);
    assert_eq!(current.version, VersionToken(created.version.0 + 8));
}

/// A rejected mutation leaves the document and its version alone
#[tokio::test]
async fn test_invalid_write_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();

    let result = store
        .patch(
            &id,
            PalettePatch {
                zoom: Some(-1.0),
                ..Default::default()
            },
            None,
        )
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let current = store.read(&id).await.unwrap();
    assert_eq!(current.version, created.version);
    assert_eq!(current.value, created.value);
}

/// Replacing the document keeps the stored id
#[tokio::test]
async fn test_replace_keeps_id() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();

    let incoming: CanvasDoc =
        serde_json::from_value(json!({"id": "other", "name": "Replaced", "zoom": 2.0})).unwrap();
    let written = store.replace(&id, incoming, Some(created.version)).await.unwrap();

    assert_eq!(written.value.id, id);
    assert_eq!(written.value.name, "Replaced");
    assert_eq!(written.value.zoom, 2.0);
}

// =============================================================================
// Nodes
// =============================================================================

/// Patching a node moves it; a missing node is NotFound and changes nothing
#[tokio::test]
async fn test_patch_node_position() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();
    store.add_node(&id, node("n1", 0.0, 0.0), None).await.unwrap();

    let moved = store
        .patch_node(
            &id,
            "n1",
            NodePatch {
                position: Some(XY { x: 10.0, y: 20.0 }),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(moved.value.position, Some(XY { x: 10.0, y: 20.0 }));
    assert_eq!(moved.value.component.as_deref(), Some("Knob"));

    let before = store.read(&id).await.unwrap();
    let missing = store
        .patch_node(&id, "missing", NodePatch::default(), None)
        .await;
    match missing {
        Err(Error::NotFound(message)) => assert!(message.contains("missing")),
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert_eq!(store.read(&id).await.unwrap(), before);
}

#[tokio::test]
async fn test_duplicate_node_id_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;

    store.add_node(&id, node("n1", 0.0, 0.0), None).await.unwrap();
    let again = store.add_node(&id, node("n1", 5.0, 5.0), None).await;
    assert!(matches!(again, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_generated_node_ids_are_distinct() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;

    let a = store.add_node(&id, NodeCreate::default(), None).await.unwrap();
    let b = store.add_node(&id, NodeCreate::default(), None).await.unwrap();
    assert_ne!(a.value.id, b.value.id);
    assert!(b.version > a.version);
}

#[tokio::test]
async fn test_remove_node() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;
    store.add_node(&id, node("n1", 0.0, 0.0), None).await.unwrap();

    let removed = store.remove_node(&id, "n1", None).await.unwrap();
    assert_eq!(removed.value.id, "n1");
    assert!(store.read(&id).await.unwrap().value.nodes.is_empty());
    assert!(matches!(
        store.remove_node(&id, "n1", None).await,
        Err(Error::NotFound(_))
    ));
}

// =============================================================================
// Snapshots
// =============================================================================

/// Restoring brings back the snapshot content under a new version
#[tokio::test]
async fn test_snapshot_restore_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;
    store.add_node(&id, node("n1", 1.0, 1.0), None).await.unwrap();

    // Given: a snapshot S of state P0
    let p0 = store.read(&id).await.unwrap();
    let snapshot = store.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.locator, format!("{}/{}", id, snapshot.ts));

    // When: two mutations, then a restore of S
    store.add_node(&id, node("n2", 2.0, 2.0), None).await.unwrap();
    store
        .patch(
            &id,
            PalettePatch {
                name: Some("Changed".to_string()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    let before_restore = store.read(&id).await.unwrap().version;
    let restored = store
        .restore(&id, SnapshotRef::Locator(snapshot.locator.clone()), None)
        .await
        .unwrap();

    // Then: content equals P0 and the version is new
    assert_eq!(restored.value, p0.value);
    assert_eq!(store.read(&id).await.unwrap().value, p0.value);
    assert_ne!(restored.version, p0.version);
    assert!(restored.version > before_restore);
}

#[tokio::test]
async fn test_restore_by_timestamp() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;
    let original = store.read(&id).await.unwrap();
    let snapshot = store.snapshot(&id).await.unwrap();
    store.add_node(&id, node("n1", 0.0, 0.0), None).await.unwrap();

    let restored = store
        .restore(&id, SnapshotRef::Ts(snapshot.ts), None)
        .await
        .unwrap();
    assert_eq!(restored.value, original.value);
}

#[tokio::test]
async fn test_restore_honours_expected_version() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();
    let snapshot = store.snapshot(&id).await.unwrap();
    store.add_node(&id, node("n1", 0.0, 0.0), None).await.unwrap();

    let stale = store
        .restore(&id, SnapshotRef::Ts(snapshot.ts), Some(created.version))
        .await;
    assert!(matches!(stale, Err(Error::Conflict(_))));
    assert_eq!(store.read(&id).await.unwrap().value.nodes.len(), 1);
}

/// A locator from another palette never restores across documents
#[tokio::test]
async fn test_restore_rejects_foreign_locator() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let a = store.create(PaletteCreate::default()).await.unwrap().value.id;
    let b = store.create(PaletteCreate::default()).await.unwrap().value.id;
    let snapshot_of_b = store.snapshot(&b).await.unwrap();

    let result = store
        .restore(&a, SnapshotRef::Locator(snapshot_of_b.locator), None)
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_restore_unknown_or_malformed_snapshot() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;

    let unknown = store
        .restore(
            &id,
            SnapshotRef::Ts("2001-01-01T00:00:00.000000Z".to_string()),
            None,
        )
        .await;
    assert!(matches!(unknown, Err(Error::NotFound(_))));

    let malformed = store
        .restore(&id, SnapshotRef::Ts("yesterday".to_string()), None)
        .await;
    assert!(matches!(malformed, Err(Error::InvalidInput(_))));

    let no_slash = store
        .restore(&id, SnapshotRef::Locator("nonsense".to_string()), None)
        .await;
    assert!(matches!(no_slash, Err(Error::InvalidInput(_))));
}

/// Back-to-back snapshots get distinct timestamps, listed newest first
#[tokio::test]
async fn test_rapid_snapshots_are_distinct() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;

    let mut taken = Vec::new();
    for _ in 0..5 {
        taken.push(store.snapshot(&id).await.unwrap().ts);
    }
    let unique: HashSet<_> = taken.iter().cloned().collect();
    assert_eq!(unique.len(), 5);

    let listed: Vec<String> = store
        .list_snapshots(&id, Page::default())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.ts)
        .collect();
    let mut newest_first = taken.clone();
    newest_first.reverse();
    assert_eq!(listed, newest_first);
}

#[tokio::test]
async fn test_snapshot_of_unknown_palette() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;

    assert!(matches!(store.snapshot("nope").await, Err(Error::NotFound(_))));
    assert!(matches!(
        store.list_snapshots("nope", Page::default()).await,
        Err(Error::NotFound(_))
    ));
}

// =============================================================================
// Listing and deletion
// =============================================================================

#[tokio::test]
async fn test_delete_removes_palette_and_snapshots() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let id = store.create(PaletteCreate::default()).await.unwrap().value.id;
    let snapshot = store.snapshot(&id).await.unwrap();

    store.delete(&id).await.unwrap();

    assert!(matches!(store.read(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(store.delete(&id).await, Err(Error::NotFound(_))));
    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM palette_snapshots WHERE palette_id = ?")
            .bind(&id)
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(remaining, 0);
    assert!(matches!(
        store.restore(&id, SnapshotRef::Locator(snapshot.locator), None).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_pages_with_total() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    for i in 0..5 {
        store
            .create(PaletteCreate {
                name: Some(format!("Palette {}", i)),
                experiment_id: None,
            })
            .await
            .unwrap();
    }

    let page = PageQuery {
        limit: Some(2),
        offset: Some(1),
    }
    .page();
    let (items, total) = store.list(page).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|p| p.node_count == 0));
}

/// Writes are announced on the event bus with their new version
#[tokio::test]
async fn test_writes_emit_events() {
    let temp = TempDir::new().unwrap();
    let store = setup_store(&temp).await;
    let created = store.create(PaletteCreate::default()).await.unwrap();
    let id = created.value.id.clone();

    // Second store on the same pool, with a bus we subscribe to
    let bus = EventBus::new(16);
    let watched = PaletteStore::new(store.pool().clone(), bus.clone());
    let mut rx = bus.subscribe();
    let written = watched.add_node(&id, node("n1", 0.0, 0.0), None).await.unwrap();

    match rx.recv().await.unwrap() {
        TrkEvent::PaletteUpdated {
            palette_id,
            version,
            ..
        } => {
            assert_eq!(palette_id, id);
            assert_eq!(version, written.version.0);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
