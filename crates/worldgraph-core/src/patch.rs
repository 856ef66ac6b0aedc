use serde::{Deserialize, Serialize};

use crate::rdf::Quad;

/// Net insertion/deletion diff produced by one accepted mutation.
///
/// Recording keeps the two lists disjoint: deleting a quad inserted earlier in
/// the same mutation cancels the insertion, and re-inserting a quad deleted
/// earlier cancels the deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub insertions: Vec<Quad>,
    pub deletions: Vec<Quad>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&mut self, quad: Quad) {
        if let Some(pos) = self.deletions.iter().position(|q| q == &quad) {
            self.deletions.swap_remove(pos);
            return;
        }
        if !self.insertions.contains(&quad) {
            self.insertions.push(quad);
        }
    }

    pub fn record_delete(&mut self, quad: Quad) {
        if let Some(pos) = self.insertions.iter().position(|q| q == &quad) {
            self.insertions.swap_remove(pos);
            return;
        }
        if !self.deletions.contains(&quad) {
            self.deletions.push(quad);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.insertions.len() + self.deletions.len()
    }
}
