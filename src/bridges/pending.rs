use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blockchain::ChainHandle;

/// Routes of one source pool that a repair removed and has not yet seen re-added.
///
/// Saved before the removal is submitted and cleared once every re-add is confirmed,
/// so a pass that stops in between leaves a record the next pass finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRepair {
    pub source_chain_id: u64,
    pub source: String,
    pub destinations: Vec<u64>,
    pub started_at: DateTime<Utc>,
}

impl PendingRepair {
    pub fn new(source: &ChainHandle, destinations: &[&ChainHandle]) -> Self {
        Self {
            source_chain_id: source.chain_id(),
            source: source.label(),
            destinations: destinations.iter().map(|d| d.chain_id()).collect(),
            started_at: Utc::now(),
        }
    }

    pub fn covers(&self, source_chain_id: u64, destination_chain_id: u64) -> bool {
        self.source_chain_id == source_chain_id && self.destinations.contains(&destination_chain_id)
    }
}
