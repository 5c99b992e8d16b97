use serde::{Deserialize, Serialize};

use crate::blockchain::{ConfirmationPolicy, VerifiedReader};
use crate::quorum::{QuorumPolicy, QuorumReader, RetryPolicy};

/// Every knob the controller and the reconciler read with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncPolicy {
    pub quorum: QuorumPolicy,
    pub retry: RetryPolicy,
    pub confirmation: ConfirmationPolicy,
}

impl SyncPolicy {
    pub fn reader(&self) -> VerifiedReader {
        VerifiedReader::new(QuorumReader::new(self.quorum), self.retry)
    }
}
