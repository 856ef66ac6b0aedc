use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oxigraph::store::Store;
use worldgraph_core::db::{open_connection, share};
use worldgraph_core::{validate_world_id, DatabaseLocation, World, WorldgraphError, WorldgraphResult};

use crate::manager::{DatabaseManager, ManagedDatabase, StorageBackend};
use crate::registry::HandleRegistry;
use crate::triple_store::graph_error;

/// SQLite sidecar files removed together with a world database.
const AUXILIARY_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// One SQLite file per world, `{base_dir}/{world_id}.db`, with the world's
/// quad store in the sibling directory `{base_dir}/{world_id}.graph`.
pub struct LocalFileDatabaseManager {
    base_dir: PathBuf,
    handles: HandleRegistry,
}

impl LocalFileDatabaseManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            handles: HandleRegistry::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn default_path(&self, world_id: &str) -> PathBuf {
        self.base_dir.join(format!("{world_id}.db"))
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    fn resolve_path(&self, world: &World) -> PathBuf {
        match &world.location {
            Some(DatabaseLocation::LocalFile { path }) => PathBuf::from(path),
            Some(DatabaseLocation::Remote { hostname, .. }) => {
                tracing::warn!(
                    world_id = %world.id,
                    hostname = %hostname,
                    "world has a remote location but the local-file backend is active; using the default path"
                );
                self.default_path(&world.id)
            }
            None => self.default_path(&world.id),
        }
    }
}

#[async_trait]
impl DatabaseManager for LocalFileDatabaseManager {
    fn backend(&self) -> StorageBackend {
        StorageBackend::LocalFile
    }

    async fn create(&self, world_id: &str) -> WorldgraphResult<ManagedDatabase> {
        validate_world_id(world_id)?;
        let path = self.default_path(world_id);
        tokio::fs::create_dir_all(&self.base_dir).await?;

        // create_new makes a second provisioning of the same world a Conflict.
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WorldgraphError::conflict(format!(
                    "database for world `{world_id}` already exists at {}",
                    path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        }
        // The database file is new, so any quad store beside it is stale.
        remove_graph_dir(&graph_dir(&path)).await?;

        let db = open_file_database(world_id, path.clone()).await?;
        self.handles.insert(db.clone());
        tracing::info!(world_id = %world_id, path = %path.display(), "provisioned local world database");
        Ok(db)
    }

    async fn get(&self, world: &World) -> WorldgraphResult<ManagedDatabase> {
        validate_world_id(&world.id)?;
        let path = self.resolve_path(world);
        let world_id = world.id.clone();
        self.handles
            .get_or_try_open(&world.id, move || async move {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                open_file_database(&world_id, path).await
            })
            .await
    }

    async fn delete(&self, world: &World) -> WorldgraphResult<()> {
        validate_world_id(&world.id)?;
        let path = self.resolve_path(world);
        drop(self.handles.retire(&world.id));
        remove_database_files(&path).await?;
        tracing::info!(world_id = %world.id, path = %path.display(), "deleted local world database");
        Ok(())
    }
}

/// Open (creating if needed) a world database file off the async runtime.
pub(crate) async fn open_file_database(
    world_id: &str,
    path: PathBuf,
) -> WorldgraphResult<ManagedDatabase> {
    let location = DatabaseLocation::LocalFile {
        path: path.display().to_string(),
    };
    open_at(world_id, path, location).await
}

pub(crate) async fn open_at(
    world_id: &str,
    path: PathBuf,
    location: DatabaseLocation,
) -> WorldgraphResult<ManagedDatabase> {
    let (conn, graph) = tokio::task::spawn_blocking(move || {
        let conn = open_connection(&path)?;
        let graph = Store::open(graph_dir(&path)).map_err(graph_error)?;
        Ok::<_, WorldgraphError>((conn, graph))
    })
    .await
    .map_err(|err| WorldgraphError::upstream(format!("open task failed: {err}")))??;
    Ok(ManagedDatabase {
        world_id: world_id.to_string(),
        conn: share(conn),
        graph,
        location,
    })
}

/// Directory of the quad store that belongs to the database file at `path`.
pub(crate) fn graph_dir(path: &Path) -> PathBuf {
    path.with_extension("graph")
}

async fn remove_graph_dir(dir: &Path) -> WorldgraphResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Remove the database file, its WAL/shared-memory sidecars and its quad
/// store. Files that are already gone are skipped.
pub(crate) async fn remove_database_files(path: &Path) -> WorldgraphResult<()> {
    remove_graph_dir(&graph_dir(path)).await?;
    let mut targets = vec![path.to_path_buf()];
    for suffix in AUXILIARY_SUFFIXES {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        targets.push(PathBuf::from(name));
    }
    for target in targets {
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
