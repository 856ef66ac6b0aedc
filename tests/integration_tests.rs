//! End-to-end tests for the Worldgraph data plane
//!
//! These run the full request flow across crates:
//! - admission → world database → triple store → patch indexer → usage meter
//! - world teardown across the local-file and remote-provisioned backends
//! - tenant-scoped search over many worlds
//!
//! Run with: cargo test --test integration_tests

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tempfile::tempdir;
use worldgraph_admission::AdmissionController;
use worldgraph_core::config::{RateLimitPolicy, RateLimitRule, StorageBackendConfig};
use worldgraph_core::db::{open_in_memory, share};
use worldgraph_core::{Actor, ActorKind, ErrorKind, WorldgraphConfig, WorldgraphError, WorldgraphResult};
use worldgraph_dataplane::{features, DataPlane};
use worldgraph_index::{
    fuse, rrf_score, HybridSearchIndex, PatchIndexer, SearchOptions, TokenHashEmbedder, RRF_K,
};
use worldgraph_storage::{
    ProvisionedDatabase, ProvisioningService, RemoteDatabaseManager, OxigraphTripleStore, WorldCatalog,
};

const EX: &str = "PREFIX ex: <http://example.com/>\n";

fn local_config(dir: &Path) -> WorldgraphConfig {
    let mut config = WorldgraphConfig::default();
    config.control_plane_path = dir.join("control.db").display().to_string();
    config.storage.backend = StorageBackendConfig::LocalFile {
        base_dir: dir.join("worlds"),
    };
    config
}

fn insert(body: &str) -> String {
    format!("{EX}INSERT DATA {{ {body} }}")
}

// ============================================================================
// Provision → search → teardown
// ============================================================================

#[tokio::test]
async fn test_provision_search_teardown() {
    let dir = tempdir().unwrap();
    let plane = DataPlane::from_config(&local_config(dir.path())).unwrap();
    let actor = Actor::tenant("acme");

    plane.create_world(&actor, "w1", "World 1", None).await.unwrap();
    let outcome = plane.update(&actor, "w1", &insert("ex:a ex:p \"Apple\"")).await.unwrap();
    assert_eq!(outcome.insertions, 1);
    assert!(outcome.degraded.is_none());

    let hits = plane
        .search(&actor, "w1", "Apple", &SearchOptions::default())
        .await
        .unwrap()
        .into_value();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].subject, "http://example.com/a");
    assert_eq!(hits[0].object, "Apple");
    assert_eq!(hits[0].world_id, "w1");

    plane.delete_world(&actor, "w1").await.unwrap();
    let err = plane
        .search(&actor, "w1", "Apple", &SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    plane.shutdown().await;
}

#[tokio::test]
async fn test_cascading_teardown_removes_database_and_chunks() {
    let dir = tempdir().unwrap();
    let plane = DataPlane::from_config(&local_config(dir.path())).unwrap();
    let actor = Actor::tenant("acme");

    plane.create_world(&actor, "w1", "World 1", None).await.unwrap();
    plane
        .update(
            &actor,
            "w1",
            &insert("ex:a ex:p \"Apple\" . ex:b ex:p \"Banana\" . ex:c ex:p \"Cherry\""),
        )
        .await
        .unwrap();
    let db_file = dir.path().join("worlds").join("w1.db");
    let graph_dir = dir.path().join("worlds").join("w1.graph");
    assert!(db_file.exists());
    assert!(graph_dir.is_dir());

    let report = plane.delete_world(&actor, "w1").await.unwrap().into_value();
    assert_eq!(report.chunks_removed, 3);
    assert!(report.storage_released);
    assert!(!db_file.exists());
    assert!(!graph_dir.exists());
    assert!(plane.list_worlds(&actor).unwrap().is_empty());

    // A world re-created under the same id starts empty.
    plane.create_world(&actor, "w1", "World 1 again", None).await.unwrap();
    let hits = plane
        .search(&actor, "w1", "Apple", &SearchOptions::default())
        .await
        .unwrap()
        .into_value();
    assert!(hits.is_empty());
}

// ============================================================================
// Index consistency
// ============================================================================

#[tokio::test]
async fn test_index_tracks_store_through_mixed_updates() {
    let dir = tempdir().unwrap();
    let plane = DataPlane::from_config(&local_config(dir.path())).unwrap();
    let actor = Actor::tenant("acme");
    plane.create_world(&actor, "w1", "World 1", None).await.unwrap();

    plane
        .update(&actor, "w1", &insert("ex:a ex:p \"Apple\" . ex:b ex:p \"Banana\""))
        .await
        .unwrap();
    let outcome = plane
        .update(
            &actor,
            "w1",
            &format!("{EX}DELETE DATA {{ ex:a ex:p \"Apple\" }} ; INSERT DATA {{ ex:a ex:p \"Apricot\" }}"),
        )
        .await
        .unwrap();
    assert_eq!((outcome.insertions, outcome.deletions), (1, 1));

    let rows = plane
        .query(&actor, "w1", &format!("{EX}SELECT ?o WHERE {{ ?s ex:p ?o }}"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(rows.len(), 2);

    let apple = plane
        .search(&actor, "w1", "Apple", &SearchOptions::default())
        .await
        .unwrap()
        .into_value();
    assert!(apple.iter().all(|hit| hit.object != "Apple"));
    let apricot = plane
        .search(&actor, "w1", "Apricot", &SearchOptions::default())
        .await
        .unwrap()
        .into_value();
    assert_eq!(apricot[0].object, "Apricot");
}

#[tokio::test]
async fn test_duplicate_insert_keeps_one_chunk() {
    let dir = tempdir().unwrap();
    let plane = DataPlane::from_config(&local_config(dir.path())).unwrap();
    let actor = Actor::tenant("acme");
    plane.create_world(&actor, "w1", "World 1", None).await.unwrap();

    let first = plane.update(&actor, "w1", &insert("ex:a ex:p \"Apple\"")).await.unwrap();
    let second = plane.update(&actor, "w1", &insert("ex:a ex:p \"Apple\"")).await.unwrap();
    assert_eq!(first.insertions, 1);
    assert_eq!(second.insertions, 0);

    let hits = plane
        .search(&actor, "w1", "Apple", &SearchOptions::default())
        .await
        .unwrap()
        .into_value();
    assert_eq!(hits.len(), 1);
}

// ============================================================================
// Ranking
// ============================================================================

#[test]
fn test_rrf_double_match_outranks_single_match() {
    let both = rrf_score(Some(1), Some(1));
    let vector_only = rrf_score(Some(1), None);
    assert!((both - 2.0 / (RRF_K + 1.0)).abs() < 1e-12);
    assert!((vector_only - 1.0 / (RRF_K + 1.0)).abs() < 1e-12);
    assert!(both > vector_only);

    let x = worldgraph_core::ChunkId::from_stored("chunk1:x");
    let y = worldgraph_core::ChunkId::from_stored("chunk1:y");
    let fused = fuse(&[y.clone(), x.clone()], &[x.clone()], 10);
    assert_eq!(fused[0].chunk_id, x);
    assert_eq!(fused[1].chunk_id, y);
    assert_eq!(fused[1].fts_rank, None);
}

// ============================================================================
// Tenant isolation
// ============================================================================

#[tokio::test]
async fn test_tenant_search_never_crosses_tenants() {
    let dir = tempdir().unwrap();
    let plane = DataPlane::from_config(&local_config(dir.path())).unwrap();
    let alice = Actor::tenant("alice");
    let bob = Actor::tenant("bob");

    for (actor, world, fruit) in [
        (&alice, "alice-1", "Apple"),
        (&alice, "alice-2", "Apple pie"),
        (&bob, "bob-1", "Apple"),
        (&bob, "bob-2", "Banana"),
    ] {
        plane.create_world(actor, world, world, None).await.unwrap();
        plane
            .update(actor, world, &insert(&format!("ex:a ex:p \"{fruit}\"")))
            .await
            .unwrap();
    }

    let filters = [
        SearchOptions::default(),
        SearchOptions {
            subject: Some("http://example.com/a".into()),
            ..SearchOptions::default()
        },
        SearchOptions {
            predicate: Some("http://example.com/p".into()),
            limit: Some(100),
            ..SearchOptions::default()
        },
    ];
    for query in ["Apple", "Banana", "pie", "a"] {
        for options in &filters {
            let hits = plane.search_tenant(&alice, query, options).await.unwrap().into_value();
            assert!(hits.iter().all(|h| h.world_id.starts_with("alice-")), "{query}");
        }
    }

    let hits = plane
        .search_tenant(&alice, "Apple", &SearchOptions::default())
        .await
        .unwrap()
        .into_value();
    let worlds: Vec<_> = hits.iter().map(|h| h.world_id.as_str()).collect();
    assert!(worlds.contains(&"alice-1"));
    assert!(worlds.contains(&"alice-2"));

    let err = plane
        .search(&alice, "bob-1", "Apple", &SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_rate_limit_denies_third_search() {
    let dir = tempdir().unwrap();
    let mut config = local_config(dir.path());
    config.rate_limits.rules.push(RateLimitRule {
        actor_kind: ActorKind::Tenant,
        feature: features::SEARCH.to_string(),
        policy: RateLimitPolicy {
            capacity: 2.0,
            refill_rate: Some(0.0),
            interval_secs: None,
        },
    });
    let plane = DataPlane::from_config(&config).unwrap();
    let actor = Actor::tenant("acme");
    plane.create_world(&actor, "w1", "World 1", None).await.unwrap();

    let first = plane.search(&actor, "w1", "x", &SearchOptions::default()).await.unwrap();
    assert_eq!(first.admission.remaining, 1);
    let second = plane.search(&actor, "w1", "x", &SearchOptions::default()).await.unwrap();
    assert_eq!(second.admission.remaining, 0);

    let err = plane
        .search(&actor, "w1", "x", &SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(err.kind().status_code(), 429);
    let admission = err.admission().unwrap();
    assert!(!admission.allowed);
    assert_eq!(admission.remaining, 0);
    assert_eq!(admission.limit, 2);

    // Other features keep their own buckets.
    plane.update(&actor, "w1", &insert("ex:a ex:p \"Apple\"")).await.unwrap();

    let usage = plane.usage(&actor, Utc::now() - Duration::minutes(5)).await.unwrap();
    assert_eq!(usage.get(features::SEARCH), Some(&2));
    assert_eq!(usage.get(features::GRAPH_UPDATE), Some(&1));
}

#[tokio::test]
async fn test_service_accounts_are_scoped_to_their_tenant() {
    let dir = tempdir().unwrap();
    let plane = DataPlane::from_config(&local_config(dir.path())).unwrap();
    let tenant = Actor::tenant("acme");
    let bot = Actor::service_account("acme-ingest", "acme");

    plane.create_world(&tenant, "w1", "World 1", None).await.unwrap();
    plane.update(&bot, "w1", &insert("ex:a ex:p \"Apple\"")).await.unwrap();
    assert_eq!(plane.list_worlds(&bot).unwrap().len(), 1);

    let since = Utc::now() - Duration::minutes(5);
    assert_eq!(plane.usage(&bot, since).await.unwrap().get(features::GRAPH_UPDATE), Some(&1));
    assert_eq!(plane.usage(&tenant, since).await.unwrap().get(features::GRAPH_UPDATE), None);
}

// ============================================================================
// Remote-provisioned backend
// ============================================================================

#[derive(Default)]
struct FlakyPlatform {
    databases: Mutex<Vec<String>>,
    fail_delete: bool,
}

#[async_trait]
impl ProvisioningService for FlakyPlatform {
    async fn create(&self, name: &str) -> WorldgraphResult<ProvisionedDatabase> {
        self.databases.lock().push(name.to_string());
        Ok(ProvisionedDatabase {
            name: name.to_string(),
            hostname: format!("{name}.db.example.io"),
        })
    }

    async fn create_token(&self, name: &str) -> WorldgraphResult<String> {
        Ok(format!("token-{name}"))
    }

    async fn get(&self, name: &str) -> WorldgraphResult<ProvisionedDatabase> {
        if !self.databases.lock().iter().any(|d| d == name) {
            return Err(WorldgraphError::not_found(name));
        }
        Ok(ProvisionedDatabase {
            name: name.to_string(),
            hostname: format!("{name}.db.example.io"),
        })
    }

    async fn delete(&self, _name: &str) -> WorldgraphResult<()> {
        if self.fail_delete {
            return Err(WorldgraphError::upstream("platform unavailable"));
        }
        Ok(())
    }
}

fn remote_plane(dir: &Path, platform: Arc<FlakyPlatform>) -> DataPlane {
    let config = WorldgraphConfig::default();
    let control = share(open_in_memory().unwrap());
    let index = Arc::new(HybridSearchIndex::new(Arc::new(TokenHashEmbedder::new(
        config.embedding.dimensions,
    ))));
    DataPlane::new(
        WorldCatalog::open(control.clone()).unwrap(),
        Arc::new(RemoteDatabaseManager::new(platform, dir.join("replicas"))),
        Arc::new(OxigraphTripleStore::new()),
        PatchIndexer::new(index),
        AdmissionController::open(control, &config).unwrap(),
    )
}

#[tokio::test]
async fn test_remote_world_lifecycle() {
    let dir = tempdir().unwrap();
    let plane = remote_plane(dir.path(), Arc::new(FlakyPlatform::default()));
    let actor = Actor::tenant("acme");

    let world = plane.create_world(&actor, "w1", "Remote", None).await.unwrap().into_value();
    match world.location {
        Some(worldgraph_core::DatabaseLocation::Remote { hostname, .. }) => {
            assert_eq!(hostname, "w1.db.example.io")
        }
        other => panic!("unexpected location {other:?}"),
    }

    plane.update(&actor, "w1", &insert("ex:a ex:p \"Apple\"")).await.unwrap();
    let hits = plane
        .search(&actor, "w1", "Apple", &SearchOptions::default())
        .await
        .unwrap()
        .into_value();
    assert_eq!(hits.len(), 1);

    let report = plane.delete_world(&actor, "w1").await.unwrap().into_value();
    assert!(report.storage_released);
    assert_eq!(report.chunks_removed, 1);
}

#[tokio::test]
async fn test_remote_delete_failure_still_removes_metadata() {
    let dir = tempdir().unwrap();
    let platform = Arc::new(FlakyPlatform {
        fail_delete: true,
        ..FlakyPlatform::default()
    });
    let plane = remote_plane(dir.path(), platform);
    let actor = Actor::tenant("acme");

    plane.create_world(&actor, "w1", "Remote", None).await.unwrap();
    let report = plane.delete_world(&actor, "w1").await.unwrap().into_value();
    assert!(!report.storage_released);

    let err = plane.get_world(&actor, "w1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
