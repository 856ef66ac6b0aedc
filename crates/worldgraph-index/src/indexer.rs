use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use worldgraph_core::{Chunk, ChunkId, Patch, WorldgraphError, WorldgraphResult};
use worldgraph_storage::ManagedDatabase;

use crate::index::HybridSearchIndex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub upserted: usize,
    pub removed: usize,
}

/// Keeps a world's index in step with its accepted mutations.
///
/// Patches must be applied in the order the triple store accepted the
/// mutations that produced them.
#[derive(Clone)]
pub struct PatchIndexer {
    index: Arc<HybridSearchIndex>,
}

impl PatchIndexer {
    pub fn new(index: Arc<HybridSearchIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<HybridSearchIndex> {
        &self.index
    }

    /// Remove the chunks of deleted quads, then upsert the chunks of inserted
    /// ones.
    ///
    /// The mutation is already committed when this runs, so any failure comes
    /// back as `DegradedIndex`.
    pub async fn apply(&self, patch: &Patch, db: &ManagedDatabase) -> WorldgraphResult<ApplyReport> {
        if patch.is_empty() {
            return Ok(ApplyReport::default());
        }
        match self.apply_inner(patch, db).await {
            Ok(report) => {
                tracing::debug!(
                    world_id = %db.world_id,
                    upserted = report.upserted,
                    removed = report.removed,
                    "applied patch to index"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::warn!(
                    world_id = %db.world_id,
                    insertions = patch.insertions.len(),
                    deletions = patch.deletions.len(),
                    error = %err,
                    "index update failed after committed mutation"
                );
                Err(WorldgraphError::degraded(format!(
                    "world `{}`: {err}",
                    db.world_id
                )))
            }
        }
    }

    async fn apply_inner(&self, patch: &Patch, db: &ManagedDatabase) -> WorldgraphResult<ApplyReport> {
        let removed_ids: Vec<ChunkId> = patch.deletions.iter().map(|q| q.chunk_id()).collect();
        let removed = self.index.remove(db, &removed_ids)?;

        // The same fact can only produce one chunk.
        let chunks: BTreeMap<ChunkId, Chunk> = patch
            .insertions
            .iter()
            .map(|q| {
                let chunk = Chunk::from_quad(q);
                (chunk.id.clone(), chunk)
            })
            .collect();
        let upserted = self.index.upsert(db, chunks.into_values().collect()).await?;
        Ok(ApplyReport { upserted, removed })
    }

    /// Drop every chunk of a world. Used when the world is torn down.
    pub fn purge_world(&self, db: &ManagedDatabase) -> WorldgraphResult<usize> {
        let removed = self.index.clear(db)?;
        self.index.forget(&db.world_id);
        tracing::info!(world_id = %db.world_id, removed, "purged world index");
        Ok(removed)
    }
}
