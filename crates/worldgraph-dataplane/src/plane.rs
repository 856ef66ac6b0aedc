use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::RwLock;
use worldgraph_admission::AdmissionController;
use worldgraph_core::db::{open_connection, share};
use worldgraph_core::{
    validate_world_id, Actor, Admission, ErrorKind, World, WorldgraphConfig, WorldgraphError,
    WorldgraphResult,
};
use worldgraph_index::{build_embedder, HybridSearchIndex, PatchIndexer, SearchHit, SearchOptions};
use worldgraph_storage::{
    build_database_manager, DatabaseManager, ManagedDatabase, QueryResults, OxigraphTripleStore,
    TripleStore, WorldCatalog,
};

use crate::features;
use crate::outcome::{Admitted, TeardownReport, UpdateOutcome};

/// Everything a request needs, composed once at startup.
pub struct DataPlane {
    catalog: WorldCatalog,
    databases: Arc<dyn DatabaseManager>,
    store: Arc<dyn TripleStore>,
    indexer: PatchIndexer,
    admission: AdmissionController,
    /// Per-world gate. Writers (update, create, delete) hold it exclusively
    /// from resolving the world until the patch is indexed, so patches reach
    /// the index in the order the store accepted them and nothing touches a
    /// world once its teardown has started. Readers share it.
    world_gates: DashMap<String, Arc<RwLock<()>>>,
}

impl DataPlane {
    pub fn new(
        catalog: WorldCatalog,
        databases: Arc<dyn DatabaseManager>,
        store: Arc<dyn TripleStore>,
        indexer: PatchIndexer,
        admission: AdmissionController,
    ) -> Self {
        Self {
            catalog,
            databases,
            store,
            indexer,
            admission,
            world_gates: DashMap::new(),
        }
    }

    /// Build the configured backend, embedder and control-plane database.
    pub fn from_config(config: &WorldgraphConfig) -> WorldgraphResult<Self> {
        config.validate()?;
        if config.control_plane_path != ":memory:" {
            if let Some(parent) = Path::new(&config.control_plane_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let control = share(open_connection(&config.control_plane_path)?);
        let catalog = WorldCatalog::open(control.clone())?;
        let admission = AdmissionController::open(control, config)?;
        let databases = build_database_manager(config)?;
        let index = Arc::new(HybridSearchIndex::new(build_embedder(&config.embedding)?));
        tracing::info!(
            backend = databases.backend().as_str(),
            embedding_model = index.embedder().model_id(),
            control_plane = %config.control_plane_path,
            "data plane ready"
        );
        Ok(Self::new(
            catalog,
            databases,
            Arc::new(OxigraphTripleStore::new()),
            PatchIndexer::new(index),
            admission,
        ))
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn index(&self) -> &Arc<HybridSearchIndex> {
        self.indexer.index()
    }

    pub fn databases(&self) -> &Arc<dyn DatabaseManager> {
        &self.databases
    }

    /// Provision storage for a new world and register it for the actor's tenant.
    ///
    /// The catalog row is written only after the database exists, so a failed
    /// provisioning leaves no metadata behind.
    pub async fn create_world(
        &self,
        actor: &Actor,
        world_id: &str,
        label: &str,
        description: Option<&str>,
    ) -> WorldgraphResult<Admitted<World>> {
        let admission = self.admission.admit(actor, features::WORLD_CREATE)?;
        validate_world_id(world_id)?;
        let gate = self.world_gate(world_id);
        let _guard = gate.write().await;
        if self.catalog.get(world_id).is_ok() {
            return Err(WorldgraphError::conflict(format!("world `{world_id}` already exists")));
        }

        let db = self.databases.create(world_id).await?;
        let mut world = World::new(world_id, actor.tenant_id.clone(), label);
        world.description = description.unwrap_or_default().to_string();
        world.location = Some(db.location.clone());

        if let Err(err) = self.catalog.insert(&world) {
            if let Err(cleanup) = self.databases.delete(&world).await {
                tracing::warn!(world_id, error = %cleanup, "failed to release storage of unregistered world");
            }
            return Err(err);
        }

        let index = self.indexer.index();
        index.forget(world_id);
        index.ensure_schema(&db)?;

        self.admission.record(
            actor,
            features::WORLD_CREATE,
            1,
            Some(json!({ "world_id": world_id, "backend": self.databases.backend().as_str() })),
        );
        tracing::info!(world_id, tenant_id = %world.tenant_id, "world created");
        Ok(Admitted { value: world, admission })
    }

    /// A live world owned by the actor's tenant. Anyone else's world is NotFound.
    pub fn get_world(&self, actor: &Actor, world_id: &str) -> WorldgraphResult<World> {
        let world = self.catalog.get(world_id)?;
        if world.tenant_id != actor.tenant_id {
            return Err(WorldgraphError::not_found(format!("world `{world_id}`")));
        }
        Ok(world)
    }

    pub fn list_worlds(&self, actor: &Actor) -> WorldgraphResult<Vec<World>> {
        self.catalog.list_by_tenant(&actor.tenant_id)
    }

    /// Apply a SPARQL update and index its patch before returning.
    ///
    /// An indexing failure does not undo the mutation; it is reported in
    /// [`UpdateOutcome::degraded`].
    pub async fn update(&self, actor: &Actor, world_id: &str, text: &str) -> WorldgraphResult<UpdateOutcome> {
        let admission = self.admission.admit(actor, features::GRAPH_UPDATE)?;
        let gate = self.world_gate(world_id);
        let _guard = gate.write().await;
        let world = self.get_world(actor, world_id)?;
        let db = self.databases.get(&world).await?;
        let patch = self.store.update(&db, text)?;
        let degraded = match self.indexer.apply(&patch, &db).await {
            Ok(_) => None,
            Err(err) => Some(err.to_string()),
        };

        self.admission.record(
            actor,
            features::GRAPH_UPDATE,
            1,
            Some(json!({
                "world_id": world_id,
                "insertions": patch.insertions.len(),
                "deletions": patch.deletions.len(),
            })),
        );
        Ok(UpdateOutcome {
            world_id: world_id.to_string(),
            insertions: patch.insertions.len(),
            deletions: patch.deletions.len(),
            admission,
            degraded,
        })
    }

    pub async fn query(&self, actor: &Actor, world_id: &str, text: &str) -> WorldgraphResult<Admitted<QueryResults>> {
        let admission = self.admission.admit(actor, features::GRAPH_QUERY)?;
        let gate = self.world_gate(world_id);
        let _guard = gate.read().await;
        let world = self.get_world(actor, world_id)?;
        let db = self.databases.get(&world).await?;
        let results = self.store.query(&db, text)?;
        self.admission.record(
            actor,
            features::GRAPH_QUERY,
            1,
            Some(json!({ "world_id": world_id, "rows": results.len() })),
        );
        Ok(Admitted { value: results, admission })
    }

    pub async fn search(
        &self,
        actor: &Actor,
        world_id: &str,
        text: &str,
        options: &SearchOptions,
    ) -> WorldgraphResult<Admitted<Vec<SearchHit>>> {
        let admission = self.admission.admit(actor, features::SEARCH)?;
        let gate = self.world_gate(world_id);
        let _guard = gate.read().await;
        let world = self.get_world(actor, world_id)?;
        let db = self.databases.get(&world).await?;
        let hits = self.indexer.index().search(&db, text, options).await?;
        self.admission.record(
            actor,
            features::SEARCH,
            1,
            Some(json!({ "world_id": world_id, "hits": hits.len() })),
        );
        Ok(Admitted { value: hits, admission })
    }

    /// Search every world of the actor's tenant and merge by fused score.
    ///
    /// Only the tenant's own worlds are ever opened. A world that cannot be
    /// searched (unreachable database, index error) is skipped with a warning;
    /// a world deleted while the search runs is skipped silently.
    pub async fn search_tenant(
        &self,
        actor: &Actor,
        text: &str,
        options: &SearchOptions,
    ) -> WorldgraphResult<Admitted<Vec<SearchHit>>> {
        let admission = self.admission.admit(actor, features::SEARCH)?;
        let worlds = self.catalog.list_by_tenant(&actor.tenant_id)?;

        let mut merged = Vec::new();
        for world in &worlds {
            let gate = self.world_gate(&world.id);
            let _guard = gate.read().await;
            match self.search_world(actor, &world.id, text, options).await {
                Ok(hits) => merged.extend(hits),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(world_id = %world.id, "world deleted during tenant search");
                }
                Err(err) => {
                    tracing::warn!(world_id = %world.id, error = %err, "skipping world in tenant search");
                }
            }
        }
        merged.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.world_id.cmp(&b.world_id))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        merged.truncate(options.effective_limit());

        self.admission.record(
            actor,
            features::SEARCH,
            1,
            Some(json!({ "scope": "tenant", "worlds": worlds.len(), "hits": merged.len() })),
        );
        Ok(Admitted { value: merged, admission })
    }

    /// Tear a world down: purge its index, destroy its database, drop its metadata.
    ///
    /// Storage that cannot be destroyed is logged and reported; the metadata
    /// is removed regardless.
    pub async fn delete_world(&self, actor: &Actor, world_id: &str) -> WorldgraphResult<Admitted<TeardownReport>> {
        let admission = self.admission.admit(actor, features::WORLD_DELETE)?;
        let gate = self.world_gate(world_id);
        let guard = gate.write().await;
        let world = self.get_world(actor, world_id)?;

        let chunks_removed = match self.databases.get(&world).await {
            Ok(db) => self.purge_index(&db),
            Err(err) => {
                tracing::warn!(world_id, error = %err, "could not open world database for index purge");
                0
            }
        };
        let storage_released = match self.databases.delete(&world).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(world_id, error = %err, "failed to destroy world database");
                false
            }
        };
        self.catalog.soft_delete(world_id)?;
        self.indexer.index().forget(world_id);
        drop(guard);
        drop(gate);
        // Waiters still hold the gate; they will find the world gone.
        self.world_gates
            .remove_if(world_id, |_, gate| Arc::strong_count(gate) == 1);

        self.admission.record(
            actor,
            features::WORLD_DELETE,
            1,
            Some(json!({ "world_id": world_id, "chunks_removed": chunks_removed })),
        );
        tracing::info!(world_id, chunks_removed, storage_released, "world deleted");
        Ok(Admitted {
            value: TeardownReport {
                world_id: world_id.to_string(),
                chunks_removed,
                storage_released,
            },
            admission,
        })
    }

    /// Usage totals per feature for the calling actor since `since`.
    ///
    /// Waits for queued records first so the caller sees its own operations.
    pub async fn usage(&self, actor: &Actor, since: DateTime<Utc>) -> WorldgraphResult<BTreeMap<String, u64>> {
        self.admission.flush().await;
        self.admission.usage_totals(&actor.id, since)
    }

    /// Bucket state for `feature` as of now, without taking a token. `None`
    /// before the actor's first check of that feature.
    pub fn peek_admission(&self, actor: &Actor, feature: &str) -> WorldgraphResult<Option<Admission>> {
        let policy = self.admission.limiter().policies().resolve(actor.kind, feature);
        let now_ms = Utc::now().timestamp_millis();
        let stored = self.admission.limiter().peek(&actor.id, feature)?;
        Ok(stored.map(|state| {
            let state = state.refilled(policy.capacity, policy.tokens_per_second, now_ms);
            Admission {
                allowed: state.tokens >= 1.0,
                limit: policy.limit(),
                remaining: state.remaining(),
                reset_at: state
                    .full_at_ms(policy.capacity, policy.tokens_per_second)
                    .and_then(DateTime::from_timestamp_millis),
            }
        }))
    }

    /// Drain queued usage records. Call before the process exits.
    pub async fn shutdown(&self) {
        self.admission.shutdown().await;
    }

    fn purge_index(&self, db: &ManagedDatabase) -> usize {
        match self.indexer.purge_world(db) {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(world_id = %db.world_id, error = %err, "index purge failed");
                0
            }
        }
    }

    /// Search one live world. The caller holds the world's gate.
    async fn search_world(
        &self,
        actor: &Actor,
        world_id: &str,
        text: &str,
        options: &SearchOptions,
    ) -> WorldgraphResult<Vec<SearchHit>> {
        let world = self.get_world(actor, world_id)?;
        let db = self.databases.get(&world).await?;
        self.indexer.index().search(&db, text, options).await
    }

    fn world_gate(&self, world_id: &str) -> Arc<RwLock<()>> {
        self.world_gates
            .entry(world_id.to_string())
            .or_default()
            .clone()
    }
}
