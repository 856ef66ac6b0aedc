//! Worldgraph core vocabulary.
//!
//! Everything the data-plane crates agree on lives here:
//!
//! - the error taxonomy ([`WorldgraphError`] / [`ErrorKind`]),
//! - the tenant/world model ([`World`], [`Actor`], [`DatabaseLocation`]),
//! - a small RDF term model with a canonical N-Triples form ([`rdf`]),
//! - content-addressed chunk ids ([`chunk`]) and mutation diffs ([`Patch`]),
//! - the admission decision surfaced to callers ([`Admission`]),
//! - configuration ([`config`]),
//! - SQLite connection helpers shared by the control plane and world databases ([`db`]).

pub mod admission;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod patch;
pub mod rdf;
pub mod world;

pub use admission::Admission;
pub use chunk::{chunk_id, Chunk, ChunkId};
pub use config::WorldgraphConfig;
pub use db::SharedConnection;
pub use error::{ErrorKind, WorldgraphError, WorldgraphResult};
pub use patch::Patch;
pub use rdf::{Literal, Quad, Term};
pub use world::{validate_world_id, Actor, ActorKind, DatabaseLocation, World};
