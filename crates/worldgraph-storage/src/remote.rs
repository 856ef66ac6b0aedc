use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use worldgraph_core::{validate_world_id, DatabaseLocation, ErrorKind, World, WorldgraphResult};

use crate::local::{open_at, remove_database_files};
use crate::manager::{DatabaseManager, ManagedDatabase, StorageBackend};
use crate::provisioning::ProvisioningService;
use crate::registry::HandleRegistry;

/// Worlds backed by databases from a provisioning service.
///
/// The remote database is named after the world id. Statements run against a
/// local replica file at `{replica_dir}/{world_id}.db` (quad store in
/// `{replica_dir}/{world_id}.graph`); the handle carries the remote hostname
/// and scoped token for the replication layer.
pub struct RemoteDatabaseManager {
    service: Arc<dyn ProvisioningService>,
    replica_dir: PathBuf,
    handles: HandleRegistry,
}

impl RemoteDatabaseManager {
    pub fn new(service: Arc<dyn ProvisioningService>, replica_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            replica_dir: replica_dir.into(),
            handles: HandleRegistry::new(),
        }
    }

    pub fn replica_path(&self, world_id: &str) -> PathBuf {
        self.replica_dir.join(format!("{world_id}.db"))
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    async fn open_replica(
        &self,
        world_id: &str,
        hostname: String,
        token: String,
    ) -> WorldgraphResult<ManagedDatabase> {
        tokio::fs::create_dir_all(&self.replica_dir).await?;
        open_at(
            world_id,
            self.replica_path(world_id),
            DatabaseLocation::Remote { hostname, token },
        )
        .await
    }
}

#[async_trait]
impl DatabaseManager for RemoteDatabaseManager {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Remote
    }

    async fn create(&self, world_id: &str) -> WorldgraphResult<ManagedDatabase> {
        validate_world_id(world_id)?;
        let provisioned = self.service.create(world_id).await?;

        let token = match self.service.create_token(world_id).await {
            Ok(token) => token,
            Err(err) => {
                // Without a token the database is unusable; don't leave it behind.
                if let Err(cleanup) = self.service.delete(world_id).await {
                    tracing::warn!(
                        world_id = %world_id,
                        error = %cleanup,
                        "failed to roll back remote database after token error"
                    );
                }
                return Err(err);
            }
        };

        // A replica left over from an earlier world with the same id is stale.
        remove_database_files(&self.replica_path(world_id)).await?;
        let db = self
            .open_replica(world_id, provisioned.hostname.clone(), token)
            .await?;
        self.handles.insert(db.clone());
        tracing::info!(
            world_id = %world_id,
            hostname = %provisioned.hostname,
            "provisioned remote world database"
        );
        Ok(db)
    }

    async fn get(&self, world: &World) -> WorldgraphResult<ManagedDatabase> {
        validate_world_id(&world.id)?;
        let stored = match &world.location {
            Some(DatabaseLocation::Remote { hostname, token }) if !token.is_empty() => {
                Some((hostname.clone(), token.clone()))
            }
            _ => None,
        };
        let world_id = world.id.clone();
        self.handles
            .get_or_try_open(&world.id, move || async move {
                let (hostname, token) = match stored {
                    Some(pair) => pair,
                    None => {
                        let provisioned = self.service.get(&world_id).await?;
                        let token = self.service.create_token(&world_id).await?;
                        (provisioned.hostname, token)
                    }
                };
                self.open_replica(&world_id, hostname, token).await
            })
            .await
    }

    async fn delete(&self, world: &World) -> WorldgraphResult<()> {
        validate_world_id(&world.id)?;
        drop(self.handles.retire(&world.id));
        remove_database_files(&self.replica_path(&world.id)).await?;
        match self.service.delete(&world.id).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(world_id = %world.id, "remote database already absent");
            }
            Err(err) => return Err(err),
        }
        tracing::info!(world_id = %world.id, "deleted remote world database");
        Ok(())
    }
}
