use serde::{Deserialize, Serialize};
use worldgraph_core::Admission;

/// A result together with the admission decision that let it through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admitted<T> {
    pub value: T,
    pub admission: Admission,
}

impl<T> Admitted<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Result of an accepted graph mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub world_id: String,
    /// Quads actually added by the mutation.
    pub insertions: usize,
    /// Quads actually removed by the mutation.
    pub deletions: usize,
    pub admission: Admission,
    /// Set when the mutation committed but the index could not be updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub world_id: String,
    pub chunks_removed: usize,
    /// False when the physical database could not be destroyed; the world is
    /// gone from the catalog either way.
    pub storage_released: bool,
}
