//! Writes and reads racing a world's teardown never resurrect or leak into it.

use std::sync::Arc;

use worldgraph_core::config::StorageBackendConfig;
use worldgraph_core::{Actor, ErrorKind, WorldgraphConfig};
use worldgraph_dataplane::DataPlane;
use worldgraph_index::SearchOptions;
use worldgraph_storage::{OxigraphTripleStore, TripleStore};

fn plane(dir: &std::path::Path) -> Arc<DataPlane> {
    let mut config = WorldgraphConfig::default();
    config.control_plane_path = ":memory:".to_string();
    config.storage.backend = StorageBackendConfig::LocalFile {
        base_dir: dir.join("worlds"),
    };
    config.rate_limits.default.capacity = 10_000.0;
    Arc::new(DataPlane::from_config(&config).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn updates_and_searches_racing_delete_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let plane = plane(dir.path());
    let actor = Actor::tenant("acme");
    plane.create_world(&actor, "w1", "racy", None).await.unwrap();
    plane
        .update(&actor, "w1", "INSERT DATA { <http://example.com/seed> <http://example.com/p> \"seed fact\" }")
        .await
        .unwrap();

    let mut writers = Vec::new();
    for i in 0..16 {
        let (plane, actor) = (plane.clone(), actor.clone());
        writers.push(tokio::spawn(async move {
            let text = format!("INSERT DATA {{ <http://example.com/s{i}> <http://example.com/p> \"fact {i}\" }}");
            plane.update(&actor, "w1", &text).await.map(|_| ())
        }));
    }
    let mut readers = Vec::new();
    for _ in 0..8 {
        let (plane, actor) = (plane.clone(), actor.clone());
        readers.push(tokio::spawn(async move {
            plane
                .search(&actor, "w1", "fact", &SearchOptions::default())
                .await
                .map(|_| ())
        }));
    }
    let delete = {
        let (plane, actor) = (plane.clone(), actor.clone());
        tokio::spawn(async move { plane.delete_world(&actor, "w1").await })
    };

    let report = delete.await.unwrap().unwrap().into_value();
    assert!(report.storage_released);
    for task in writers.into_iter().chain(readers) {
        if let Err(err) = task.await.unwrap() {
            assert_eq!(err.kind(), ErrorKind::NotFound, "unexpected error: {err}");
        }
    }

    let err = plane.get_world(&actor, "w1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!dir.path().join("worlds/w1.db").exists());
    assert!(!dir.path().join("worlds/w1.graph").exists());

    // A world created under the same id starts empty.
    plane.create_world(&actor, "w1", "fresh", None).await.unwrap();
    let world = plane.get_world(&actor, "w1").unwrap();
    let db = plane.databases().get(&world).await.unwrap();
    assert_eq!(OxigraphTripleStore::new().count(&db).unwrap(), 0);
    assert_eq!(plane.index().count(&db).unwrap(), 0);
    plane.shutdown().await;
}

#[tokio::test]
async fn update_after_delete_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let plane = plane(dir.path());
    let actor = Actor::tenant("acme");
    plane.create_world(&actor, "w1", "gone", None).await.unwrap();
    plane.delete_world(&actor, "w1").await.unwrap();

    let err = plane
        .update(&actor, "w1", "INSERT DATA { <http://example.com/a> <http://example.com/p> \"x\" }")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = plane
        .query(&actor, "w1", "SELECT * WHERE { ?s ?p ?o }")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!dir.path().join("worlds/w1.db").exists());
}
