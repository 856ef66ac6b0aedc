//! Content-addressed chunk ids.
//!
//! A chunk id is `sha256` over the canonical N-Triples line of a fact
//! (blank nodes skolemized, graph name excluded), rendered as lowercase hex
//! behind a version prefix. The same fact always yields the same id no matter
//! which mutation produced it, which is what makes index upserts idempotent.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rdf::{Quad, Term};

pub const CHUNK_ID_V1_PREFIX: &str = "chunk1:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an id read back from storage.
    pub fn from_stored(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id of the fact `(subject, predicate, object)`.
pub fn chunk_id(subject: &Term, predicate: &str, object: &Term) -> ChunkId {
    let line = Quad::triple(subject.clone(), predicate, object.clone()).canonical_triple_line();
    chunk_id_for_line(&line)
}

fn chunk_id_for_line(line: &str) -> ChunkId {
    let digest = Sha256::digest(line.as_bytes());
    let mut out = String::with_capacity(CHUNK_ID_V1_PREFIX.len() + 64);
    out.push_str(CHUNK_ID_V1_PREFIX);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    ChunkId(out)
}

impl Quad {
    pub fn chunk_id(&self) -> ChunkId {
        chunk_id_for_line(&self.canonical_triple_line())
    }
}

/// One indexed retrieval unit: a single fact plus the embedding of its object text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Build the chunk for a quad. Subjects and objects are skolemized first so
    /// chunk text matches what the id was hashed over.
    pub fn from_quad(quad: &Quad) -> Self {
        let subject = quad.subject.skolemized();
        let object = quad.object.skolemized();
        Self {
            id: quad.chunk_id(),
            subject: subject.text().to_string(),
            predicate: quad.predicate.clone(),
            object: object.text().to_string(),
            embedding: None,
        }
    }
}
