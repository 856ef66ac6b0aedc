//! Retrieval index for Worldgraph worlds.
//!
//! Every fact in a world is one [`Chunk`](worldgraph_core::Chunk) row in that
//! world's database. Rows carry the object text (mirrored into an FTS5 table by
//! triggers) and an embedding of it. [`HybridSearchIndex::search`] fuses the
//! vector ranking and the BM25 ranking with reciprocal rank fusion.
//!
//! [`PatchIndexer`] applies the diff of each accepted mutation to the index, so
//! there is no bulk reindex step.

pub mod embedding;
pub mod index;
pub mod indexer;
pub mod rrf;
pub mod text;
pub mod vector;

pub use embedding::{build_embedder, Embedder, OpenAiEmbedder, TokenHashEmbedder};
pub use index::{HybridSearchIndex, SearchHit, SearchOptions};
pub use indexer::{ApplyReport, PatchIndexer};
pub use rrf::{fuse, rrf_score, FusedCandidate, RRF_K};
