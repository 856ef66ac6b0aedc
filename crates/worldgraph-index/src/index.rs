use std::sync::Arc;

use dashmap::DashSet;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use worldgraph_core::{Chunk, ChunkId, WorldgraphError, WorldgraphResult};
use worldgraph_storage::ManagedDatabase;

use crate::embedding::{verify_batch, Embedder};
use crate::rrf::fuse;
use crate::text::fts_match_expression;
use crate::vector::{cosine_similarity, decode_embedding, encode_embedding};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const MAX_SEARCH_LIMIT: usize = 100;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kb_chunks (
    id        TEXT PRIMARY KEY,
    subject   TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object    TEXT NOT NULL,
    embedding BLOB
);
CREATE INDEX IF NOT EXISTS kb_chunks_subject_idx ON kb_chunks(subject);
CREATE INDEX IF NOT EXISTS kb_chunks_predicate_idx ON kb_chunks(predicate);

CREATE VIRTUAL TABLE IF NOT EXISTS kb_chunks_fts USING fts5(
    object,
    content='kb_chunks',
    content_rowid='rowid',
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS kb_chunks_ai AFTER INSERT ON kb_chunks BEGIN
    INSERT INTO kb_chunks_fts(rowid, object) VALUES (new.rowid, new.object);
END;
CREATE TRIGGER IF NOT EXISTS kb_chunks_ad AFTER DELETE ON kb_chunks BEGIN
    INSERT INTO kb_chunks_fts(kb_chunks_fts, rowid, object) VALUES ('delete', old.rowid, old.object);
END;
CREATE TRIGGER IF NOT EXISTS kb_chunks_au AFTER UPDATE ON kb_chunks BEGIN
    INSERT INTO kb_chunks_fts(kb_chunks_fts, rowid, object) VALUES ('delete', old.rowid, old.object);
    INSERT INTO kb_chunks_fts(rowid, object) VALUES (new.rowid, new.object);
END;

CREATE TABLE IF NOT EXISTS kb_index_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const META_MODEL: &str = "embedding_model";
const META_DIMENSIONS: &str = "embedding_dimensions";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Number of results; defaults to 10 and is clamped to 1..=100.
    pub limit: Option<usize>,
    /// Exact-match filter on the chunk subject.
    pub subject: Option<String>,
    /// Exact-match filter on the chunk predicate.
    pub predicate: Option<String>,
}

impl SearchOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub world_id: String,
    pub chunk_id: ChunkId,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub vec_rank: Option<usize>,
    pub fts_rank: Option<usize>,
    pub score: f64,
}

/// Hybrid (vector + BM25) index over the chunks of one world database.
///
/// Chunk rows live in the world's own database, so a search can only ever see
/// that world's facts.
pub struct HybridSearchIndex {
    embedder: Arc<dyn Embedder>,
    /// Worlds whose schema and embedding metadata were already checked.
    ready: DashSet<String>,
}

impl HybridSearchIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            ready: DashSet::new(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Create the index tables if needed and pin the embedding model.
    ///
    /// A world indexed with a different model or dimensionality is rejected.
    pub fn ensure_schema(&self, db: &ManagedDatabase) -> WorldgraphResult<()> {
        if self.ready.contains(&db.world_id) {
            return Ok(());
        }
        let model = self.embedder.model_id().to_string();
        let dimensions = self.embedder.dimensions().to_string();
        db.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            let tx = conn.transaction()?;
            for (key, expected) in [(META_MODEL, &model), (META_DIMENSIONS, &dimensions)] {
                let stored: Option<String> = tx
                    .query_row(
                        "SELECT value FROM kb_index_meta WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                match stored {
                    Some(value) if &value != expected => {
                        return Err(WorldgraphError::invalid(format!(
                            "index of world `{}` was built with {key}={value}, configured {expected}",
                            db.world_id
                        )));
                    }
                    Some(_) => {}
                    None => {
                        tx.execute(
                            "INSERT INTO kb_index_meta (key, value) VALUES (?1, ?2)",
                            params![key, expected],
                        )?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })?;
        self.ready.insert(db.world_id.clone());
        Ok(())
    }

    /// Drop the cached schema check for a world (after its database is destroyed).
    pub fn forget(&self, world_id: &str) {
        self.ready.remove(world_id);
    }

    /// Insert or replace chunks by id, embedding the object text of any chunk
    /// that has no embedding yet. Returns the number of rows written.
    pub async fn upsert(&self, db: &ManagedDatabase, mut chunks: Vec<Chunk>) -> WorldgraphResult<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.ensure_schema(db)?;

        let missing: Vec<usize> = (0..chunks.len())
            .filter(|&i| chunks[i].embedding.is_none())
            .collect();
        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| chunks[i].object.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            verify_batch(self.embedder.as_ref(), texts.len(), &vectors)?;
            for (i, vector) in missing.into_iter().zip(vectors) {
                chunks[i].embedding = Some(vector);
            }
        }
        let dims = self.embedder.dimensions();
        if let Some(bad) = chunks
            .iter()
            .find(|c| c.embedding.as_ref().is_some_and(|e| e.len() != dims))
        {
            return Err(WorldgraphError::invalid(format!(
                "chunk {} has an embedding of the wrong dimensionality",
                bad.id
            )));
        }

        db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut written = 0;
            {
                // An UPDATE on conflict keeps the rowid, and the update trigger
                // re-indexes the text.
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO kb_chunks (id, subject, predicate, object, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        subject = excluded.subject,
                        predicate = excluded.predicate,
                        object = excluded.object,
                        embedding = excluded.embedding",
                )?;
                for chunk in &chunks {
                    written += stmt.execute(params![
                        chunk.id.as_str(),
                        chunk.subject,
                        chunk.predicate,
                        chunk.object,
                        chunk.embedding.as_deref().map(encode_embedding),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    /// Delete chunks by id. Unknown ids are ignored. Returns rows deleted.
    pub fn remove(&self, db: &ManagedDatabase, ids: &[ChunkId]) -> WorldgraphResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.ensure_schema(db)?;
        db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM kb_chunks WHERE id = ?1")?;
                for id in ids {
                    removed += stmt.execute(params![id.as_str()])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Delete every chunk of the world. Returns rows deleted.
    pub fn clear(&self, db: &ManagedDatabase) -> WorldgraphResult<usize> {
        self.ensure_schema(db)?;
        db.with_conn(|conn| Ok(conn.execute("DELETE FROM kb_chunks", [])?))
    }

    pub fn count(&self, db: &ManagedDatabase) -> WorldgraphResult<usize> {
        self.ensure_schema(db)?;
        db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM kb_chunks", [], |row| row.get(0))?;
            Ok(n.max(0) as usize)
        })
    }

    pub fn chunk_ids(&self, db: &ManagedDatabase) -> WorldgraphResult<Vec<ChunkId>> {
        self.ensure_schema(db)?;
        db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM kb_chunks ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(ChunkId::from_stored(row?));
            }
            Ok(out)
        })
    }

    pub fn get(&self, db: &ManagedDatabase, id: &ChunkId) -> WorldgraphResult<Option<Chunk>> {
        self.ensure_schema(db)?;
        db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT subject, predicate, object, embedding FROM kb_chunks WHERE id = ?1",
                    params![id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<Vec<u8>>>(3)?,
                        ))
                    },
                )
                .optional()?;
            let Some((subject, predicate, object, blob)) = row else {
                return Ok(None);
            };
            Ok(Some(Chunk {
                id: id.clone(),
                subject,
                predicate,
                object,
                embedding: blob.as_deref().map(decode_embedding).transpose()?,
            }))
        })
    }

    /// Reciprocal-rank-fused search over one world.
    pub async fn search(
        &self,
        db: &ManagedDatabase,
        query: &str,
        options: &SearchOptions,
    ) -> WorldgraphResult<Vec<SearchHit>> {
        let fts_expr = fts_match_expression(query)?;
        let limit = options.effective_limit();
        self.ensure_schema(db)?;

        // Embed before taking the connection lock.
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        verify_batch(self.embedder.as_ref(), 1, &vectors)?;
        let query_vector = &vectors[0];

        db.with_conn(|conn| {
            let subject = options.subject.as_deref();
            let predicate = options.predicate.as_deref();

            // Vector ranking: exact cosine scan over the filtered rows.
            let mut scored: Vec<(f32, ChunkId)> = Vec::new();
            {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, embedding FROM kb_chunks
                     WHERE embedding IS NOT NULL
                       AND (?1 IS NULL OR subject = ?1)
                       AND (?2 IS NULL OR predicate = ?2)",
                )?;
                let mut rows = stmt.query(params![subject, predicate])?;
                while let Some(row) = rows.next()? {
                    let id: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    let similarity = cosine_similarity(query_vector, &decode_embedding(&blob)?);
                    // No shared signal is not a neighbour.
                    if similarity > 0.0 {
                        scored.push((similarity, ChunkId::from_stored(id)));
                    }
                }
            }
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            });
            let vec_ids: Vec<ChunkId> = scored.into_iter().take(limit).map(|(_, id)| id).collect();

            // Text ranking: BM25 over the FTS mirror.
            let mut fts_ids: Vec<ChunkId> = Vec::new();
            {
                let mut stmt = conn.prepare_cached(
                    "SELECT c.id FROM kb_chunks_fts f
                     JOIN kb_chunks c ON c.rowid = f.rowid
                     WHERE kb_chunks_fts MATCH ?1
                       AND (?2 IS NULL OR c.subject = ?2)
                       AND (?3 IS NULL OR c.predicate = ?3)
                     ORDER BY bm25(kb_chunks_fts), c.id
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(params![fts_expr, subject, predicate, limit as i64], |row| {
                    row.get::<_, String>(0)
                })?;
                for row in rows {
                    fts_ids.push(ChunkId::from_stored(row?));
                }
            }

            let fused = fuse(&vec_ids, &fts_ids, limit);
            let mut hits = Vec::with_capacity(fused.len());
            let mut stmt = conn.prepare_cached(
                "SELECT subject, predicate, object FROM kb_chunks WHERE id = ?1",
            )?;
            for candidate in fused {
                let (subject, predicate, object): (String, String, String) = stmt.query_row(
                    params![candidate.chunk_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                hits.push(SearchHit {
                    world_id: db.world_id.clone(),
                    chunk_id: candidate.chunk_id,
                    subject,
                    predicate,
                    object,
                    vec_rank: candidate.vec_rank,
                    fts_rank: candidate.fts_rank,
                    score: candidate.score,
                });
            }
            Ok(hits)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::TokenHashEmbedder;
    use worldgraph_core::{ErrorKind, Quad, Term};

    fn index() -> HybridSearchIndex {
        HybridSearchIndex::new(Arc::new(TokenHashEmbedder::new(64)))
    }

    fn chunk(s: &str, p: &str, o: &str) -> Chunk {
        Chunk::from_quad(&Quad::triple(
            Term::iri(format!("https://example.com/{s}")),
            format!("https://example.com/{p}"),
            Term::literal(o),
        ))
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let index = index();
        let db = ManagedDatabase::in_memory("w1").unwrap();
        let c = chunk("a", "p", "Apple");
        index.upsert(&db, vec![c.clone()]).await.unwrap();
        index.upsert(&db, vec![c.clone()]).await.unwrap();
        assert_eq!(index.count(&db).unwrap(), 1);
        assert_eq!(index.chunk_ids(&db).unwrap(), vec![c.id.clone()]);

        let stored = index.get(&db, &c.id).unwrap().unwrap();
        assert_eq!(stored.object, "Apple");
        assert_eq!(stored.embedding.map(|e| e.len()), Some(64));
    }

    #[tokio::test]
    async fn search_finds_text_and_vector_matches() {
        let index = index();
        let db = ManagedDatabase::in_memory("w1").unwrap();
        index
            .upsert(
                &db,
                vec![
                    chunk("a", "p", "Apple"),
                    chunk("b", "p", "Banana"),
                    chunk("c", "q", "apple pie"),
                ],
            )
            .await
            .unwrap();

        let hits = index.search(&db, "Apple", &SearchOptions::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].subject, "https://example.com/a");
        assert_eq!(hits[0].vec_rank, Some(1));
        assert!(hits[0].fts_rank.is_some());
        assert!(hits.iter().all(|h| h.world_id == "w1"));
        assert!(hits.iter().all(|h| h.object != "Banana"));
    }

    #[tokio::test]
    async fn filters_exclude_non_matching_candidates() {
        let index = index();
        let db = ManagedDatabase::in_memory("w1").unwrap();
        index
            .upsert(&db, vec![chunk("a", "p", "Apple"), chunk("c", "q", "apple pie")])
            .await
            .unwrap();

        let options = SearchOptions {
            predicate: Some("https://example.com/q".to_string()),
            ..SearchOptions::default()
        };
        let hits = index.search(&db, "apple", &options).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject, "https://example.com/c");

        let options = SearchOptions {
            subject: Some("https://example.com/zzz".to_string()),
            ..SearchOptions::default()
        };
        assert!(index.search(&db, "apple", &options).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_chunks_leave_full_text_index() {
        let index = index();
        let db = ManagedDatabase::in_memory("w1").unwrap();
        let c = chunk("a", "p", "Apple");
        index.upsert(&db, vec![c.clone()]).await.unwrap();
        assert_eq!(index.remove(&db, &[c.id.clone()]).unwrap(), 1);
        assert_eq!(index.remove(&db, &[c.id.clone()]).unwrap(), 0);
        assert!(index.search(&db, "Apple", &SearchOptions::default()).await.unwrap().is_empty());
        let fts_rows: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM kb_chunks_fts WHERE kb_chunks_fts MATCH '\"apple\"'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(fts_rows, 0);
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        assert_eq!(SearchOptions::with_limit(0).effective_limit(), 1);
        assert_eq!(SearchOptions::with_limit(1000).effective_limit(), MAX_SEARCH_LIMIT);
        assert_eq!(SearchOptions::default().effective_limit(), DEFAULT_SEARCH_LIMIT);
    }

    #[tokio::test]
    async fn empty_query_is_invalid_input() {
        let index = index();
        let db = ManagedDatabase::in_memory("w1").unwrap();
        let err = index.search(&db, "  ", &SearchOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn mismatched_embedding_model_is_rejected() {
        let db = ManagedDatabase::in_memory("w1").unwrap();
        index().ensure_schema(&db).unwrap();
        let other = HybridSearchIndex::new(Arc::new(TokenHashEmbedder::new(32)));
        let err = other.ensure_schema(&db).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let index = index();
        let db = ManagedDatabase::in_memory("w1").unwrap();
        index
            .upsert(&db, vec![chunk("a", "p", "Apple"), chunk("b", "p", "Banana")])
            .await
            .unwrap();
        assert_eq!(index.clear(&db).unwrap(), 2);
        assert_eq!(index.count(&db).unwrap(), 0);
    }
}
