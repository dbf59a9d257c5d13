//! Process-wide registry of uploaded artifact batches and the session key
//! derived from it.

use std::collections::BTreeMap;

use crate::models::{Artifact, ArtifactBatch};

/// Session key used while no batch has been uploaded.
pub const EMPTY_STORE_KEY: &str = "no_files";

/// Upload batches keyed by their display name.
///
/// Batches are stored whole; re-recording an identifier replaces its batch.
#[derive(Debug, Default, Clone)]
pub struct ArtifactStore {
    batches: BTreeMap<String, ArtifactBatch>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the batch stored under `batch_id`.
    pub fn record(&mut self, batch_id: impl Into<String>, batch: ArtifactBatch) {
        let batch_id = batch_id.into();
        if self.batches.insert(batch_id.clone(), batch).is_some() {
            // Same name, possibly different content: the session key will not change.
            tracing::debug!(batch = %batch_id, "replaced existing upload batch");
        }
    }

    /// Sorted, comma-joined batch identifiers, or [`EMPTY_STORE_KEY`].
    pub fn current_key(&self) -> String {
        if self.batches.is_empty() {
            return EMPTY_STORE_KEY.to_string();
        }
        // BTreeMap keys iterate in sorted order.
        self.batches
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn reset(&mut self) {
        self.batches.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn batch(&self, batch_id: &str) -> Option<&ArtifactBatch> {
        self.batches.get(batch_id)
    }

    /// Every stored artifact, batch by batch, in key order.
    pub fn artifacts(&self) -> impl Iterator<Item = Artifact> + '_ {
        self.batches.iter().flat_map(|(batch_id, batch)| {
            batch.iter().map(move |(filename, content)| Artifact {
                filename: filename.clone(),
                content: content.clone(),
                source_batch: batch_id.clone(),
            })
        })
    }
}
