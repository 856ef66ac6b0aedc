use std::sync::Arc;

use async_trait::async_trait;
use oxigraph::store::Store;
use worldgraph_core::config::{StorageBackendConfig, WorldgraphConfig};
use worldgraph_core::db::{open_in_memory, share};
use worldgraph_core::{DatabaseLocation, SharedConnection, World, WorldgraphResult};

use crate::local::LocalFileDatabaseManager;
use crate::triple_store::graph_error;
use crate::provisioning::HttpProvisioningClient;
use crate::remote::RemoteDatabaseManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    LocalFile,
    Remote,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackend::LocalFile => "local_file",
            StorageBackend::Remote => "remote",
        }
    }
}

/// Live handle to one world's database.
///
/// `conn` is the world's SQLite database (search index tables); `graph` is the
/// world's quad store. Cloning is cheap and every clone shares both. Callers
/// hold handles; the [`DatabaseManager`] that produced it owns the lifecycle.
#[derive(Clone)]
pub struct ManagedDatabase {
    pub world_id: String,
    pub conn: SharedConnection,
    pub graph: Store,
    pub location: DatabaseLocation,
}

impl std::fmt::Debug for ManagedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = match &self.location {
            DatabaseLocation::Remote { hostname, .. } => format!("remote({hostname})"),
            DatabaseLocation::LocalFile { path } => format!("file({path})"),
        };
        f.debug_struct("ManagedDatabase")
            .field("world_id", &self.world_id)
            .field("location", &location)
            .finish()
    }
}

impl ManagedDatabase {
    /// A throwaway in-memory database, for tests and tooling.
    pub fn in_memory(world_id: impl Into<String>) -> WorldgraphResult<Self> {
        Ok(Self {
            world_id: world_id.into(),
            conn: share(open_in_memory()?),
            graph: Store::new().map_err(graph_error)?,
            location: DatabaseLocation::LocalFile {
                path: ":memory:".to_string(),
            },
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut rusqlite::Connection) -> WorldgraphResult<T>,
    ) -> WorldgraphResult<T> {
        let mut guard = self.conn.lock();
        f(&mut guard)
    }
}

/// Provisions, resolves and destroys the physical database behind a world.
///
/// `create` must be called at most once per world; the caller persists the
/// returned location only after it succeeds.
#[async_trait]
pub trait DatabaseManager: Send + Sync {
    fn backend(&self) -> StorageBackend;

    async fn create(&self, world_id: &str) -> WorldgraphResult<ManagedDatabase>;

    /// Resolve the handle for a world, reconnecting to its stored location when
    /// there is one. Repeated calls return the cached handle. A world whose
    /// database was deleted is NotFound until it is created again.
    async fn get(&self, world: &World) -> WorldgraphResult<ManagedDatabase>;

    /// Destroy the world's physical database. An already-absent database is
    /// not an error.
    async fn delete(&self, world: &World) -> WorldgraphResult<()>;
}

/// Build the backend named by the configuration. Called once at startup.
pub fn build_database_manager(
    config: &WorldgraphConfig,
) -> WorldgraphResult<Arc<dyn DatabaseManager>> {
    match &config.storage.backend {
        StorageBackendConfig::LocalFile { base_dir } => {
            Ok(Arc::new(LocalFileDatabaseManager::new(base_dir.clone())))
        }
        StorageBackendConfig::Remote {
            replica_dir,
            provisioning,
        } => {
            let client = HttpProvisioningClient::from_config(provisioning)?;
            Ok(Arc::new(RemoteDatabaseManager::new(
                Arc::new(client),
                replica_dir.clone(),
            )))
        }
    }
}
