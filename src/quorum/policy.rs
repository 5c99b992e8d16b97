use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    DEFAULT_MIN_CONSENSUS, DEFAULT_READ_ATTEMPTS, DEFAULT_READ_BACKOFF_MS,
    DEFAULT_ENDPOINT_TIMEOUT_MS,
};
use crate::error::{KeeperError, KeeperResult};

/// Threshold policy for a quorum read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumPolicy {
    /// Minimum number of endpoints that must return the same value
    pub min_consensus: usize,
    /// Bound on each endpoint call; slower answers are discarded
    pub timeout_per_endpoint: Duration,
    /// Additionally require the agreeing group to be a strict majority of successful responses
    pub require_majority: bool,
}

impl QuorumPolicy {
    pub fn new(min_consensus: usize, timeout_per_endpoint: Duration, require_majority: bool) -> KeeperResult<Self> {
        if min_consensus == 0 {
            return Err(KeeperError::Config("min_consensus must be at least 1".to_string()));
        }
        if timeout_per_endpoint.is_zero() {
            return Err(KeeperError::Config("endpoint timeout must be greater than 0".to_string()));
        }

        Ok(Self {
            min_consensus,
            timeout_per_endpoint,
            require_majority,
        })
    }

    /// Whether a group of `agreement` identical answers out of `successful` responses is trusted
    pub fn accepts(&self, agreement: usize, successful: usize) -> bool {
        if agreement < self.min_consensus {
            return false;
        }
        if self.require_majority && agreement * 2 <= successful {
            return false;
        }
        true
    }
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self {
            min_consensus: DEFAULT_MIN_CONSENSUS,
            timeout_per_endpoint: Duration::from_millis(DEFAULT_ENDPOINT_TIMEOUT_MS),
            require_majority: true,
        }
    }
}

/// Caller-side retry of failed quorum reads.
///
/// The quorum engine never retries on its own. Every component that wants retries
/// goes through this one policy so the behaviour is identical everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retries
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op`, re-attempting only quorum read failures. Any other error returns at once.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> KeeperResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = KeeperResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_read_failure() && attempt < self.max_attempts => {
                    warn!(
                        "🔁 {} failed (attempt {}/{}): {} - retrying in {:?}",
                        label, attempt, self.max_attempts, e, self.backoff
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_READ_ATTEMPTS, Duration::from_millis(DEFAULT_READ_BACKOFF_MS))
    }
}
