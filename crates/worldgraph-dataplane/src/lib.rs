//! The Worldgraph data plane.
//!
//! [`DataPlane`] wires the world catalog, the database manager, the embedded
//! triple store, the hybrid index and admission control into the request
//! flows callers use:
//!
//! ```text
//! mutate: admit -> resolve world db -> TripleStore::update -> PatchIndexer::apply -> record
//! read:   admit -> resolve world db -> TripleStore::query | HybridSearchIndex::search -> record
//! ```

pub mod features;
pub mod outcome;
pub mod plane;

pub use outcome::{Admitted, TeardownReport, UpdateOutcome};
pub use plane::DataPlane;
