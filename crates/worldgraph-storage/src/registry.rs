//! Per-manager cache of open world handles.

use std::future::Future;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::OnceCell;
use worldgraph_core::{WorldgraphError, WorldgraphResult};

use crate::manager::ManagedDatabase;

/// World id -> open handle.
///
/// Concurrent first access to the same world runs the opener once; the other
/// callers wait for it and reuse its handle. A failed open leaves the slot
/// empty so the next caller retries. Retired worlds are never reopened until
/// a fresh handle is inserted for them.
#[derive(Default)]
pub struct HandleRegistry {
    slots: DashMap<String, Arc<OnceCell<ManagedDatabase>>>,
    retired: DashSet<String>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_open<F, Fut>(
        &self,
        world_id: &str,
        open: F,
    ) -> WorldgraphResult<ManagedDatabase>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorldgraphResult<ManagedDatabase>>,
    {
        self.ensure_live(world_id)?;
        // Clone the slot out so no map shard lock is held across the await.
        let slot = self
            .slots
            .entry(world_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let db = slot.get_or_try_init(open).await?.clone();
        // Retired while the open was in flight.
        self.ensure_live(world_id)?;
        Ok(db)
    }

    /// Register a handle that was just created.
    pub fn insert(&self, db: ManagedDatabase) {
        self.retired.remove(&db.world_id);
        self.slots
            .insert(db.world_id.clone(), Arc::new(OnceCell::new_with(Some(db))));
    }

    /// Drop the cached handle and refuse to reopen the world.
    pub fn retire(&self, world_id: &str) -> Option<ManagedDatabase> {
        self.retired.insert(world_id.to_string());
        self.slots
            .remove(world_id)
            .and_then(|(_, slot)| slot.get().cloned())
    }

    pub fn is_retired(&self, world_id: &str) -> bool {
        self.retired.contains(world_id)
    }

    fn ensure_live(&self, world_id: &str) -> WorldgraphResult<()> {
        if self.retired.contains(world_id) {
            return Err(WorldgraphError::not_found(format!(
                "database of world `{world_id}` has been deleted"
            )));
        }
        Ok(())
    }

    pub fn contains(&self, world_id: &str) -> bool {
        self.slots
            .get(world_id)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use worldgraph_core::{ErrorKind, WorldgraphError};

    #[tokio::test]
    async fn concurrent_first_access_opens_once() {
        let registry = Arc::new(HandleRegistry::new());
        let opens = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let opens = opens.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_try_open("w1", move || async move {
                        opens.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        ManagedDatabase::in_memory("w1")
                    })
                    .await
                    .unwrap()
            }));
        }
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(handles
            .windows(2)
            .all(|pair| Arc::ptr_eq(&pair[0].conn, &pair[1].conn)));
    }

    #[tokio::test]
    async fn failed_open_is_retried() {
        let registry = HandleRegistry::new();
        let err = registry
            .get_or_try_open("w1", || async { Err(WorldgraphError::upstream("down")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(!registry.contains("w1"));

        registry
            .get_or_try_open("w1", || async { ManagedDatabase::in_memory("w1") })
            .await
            .unwrap();
        assert!(registry.contains("w1"));
    }

    #[tokio::test]
    async fn retire_drops_cached_handle_and_blocks_reopen() {
        let registry = HandleRegistry::new();
        registry.insert(ManagedDatabase::in_memory("w1").unwrap());
        assert_eq!(registry.len(), 1);
        assert!(registry.retire("w1").is_some());
        assert!(registry.is_empty());
        assert!(registry.retire("w1").is_none());

        let err = registry
            .get_or_try_open("w1", || async { ManagedDatabase::in_memory("w1") })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!registry.contains("w1"));

        registry.insert(ManagedDatabase::in_memory("w1").unwrap());
        assert!(!registry.is_retired("w1"));
        registry
            .get_or_try_open("w1", || async { ManagedDatabase::in_memory("w1") })
            .await
            .unwrap();
    }
}
