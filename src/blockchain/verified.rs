use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::node::VaultNode;
use super::registry::ChainHandle;
use crate::constants::{DEFAULT_CONFIRMATION_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS};
use crate::error::{KeeperError, KeeperResult, NodeError};
use crate::quorum::{QuorumReader, RetryPolicy};
use crate::types::{AggregateState, ChainSnapshot};

/// How long to wait for a submitted write to become visible through quorum reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_CONFIRMATION_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Quorum reads bound to chain handles.
///
/// Every decision-driving read in the keeper goes through here, so retry behaviour
/// is the same for the controller and the reconciler.
#[derive(Debug, Clone)]
pub struct VerifiedReader {
    quorum: QuorumReader,
    retry: RetryPolicy,
}

impl VerifiedReader {
    pub fn new(quorum: QuorumReader, retry: RetryPolicy) -> Self {
        Self { quorum, retry }
    }

    pub fn quorum(&self) -> &QuorumReader {
        &self.quorum
    }

    /// Quorum read over every endpoint of `chain`, retried per the retry policy
    pub async fn read<T, F, Fut>(&self, chain: &ChainHandle, query: &str, f: F) -> KeeperResult<T>
    where
        T: PartialEq + Clone + Debug,
        F: Fn(Arc<dyn VaultNode>) -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let label = chain.label();
        let retry_label = format!("{} {}", label, query);
        self.retry
            .run(&retry_label, || self.quorum.read_value(&label, query, &chain.nodes, &f))
            .await
    }

    pub async fn round(&self, chain: &ChainHandle) -> KeeperResult<u64> {
        self.read(chain, "currentRound", |node| async move { node.current_round().await })
            .await
    }

    pub async fn epoch(&self, chain: &ChainHandle) -> KeeperResult<u64> {
        self.read(chain, "currentEpoch", |node| async move { node.current_epoch().await })
            .await
    }

    pub async fn paused(&self, chain: &ChainHandle) -> KeeperResult<bool> {
        self.read(chain, "paused", |node| async move { node.is_paused().await })
            .await
    }

    pub async fn chain_id(&self, chain: &ChainHandle) -> KeeperResult<u64> {
        self.read(chain, "eth_chainId", |node| async move { node.chain_id().await })
            .await
    }

    pub async fn code_hash(&self, chain: &ChainHandle, address: Address) -> KeeperResult<ethers::types::H256> {
        self.read(chain, "eth_getCode", move |node| async move { node.code_hash(address).await })
            .await
    }

    /// Staked, pending and supply totals, each agreed on independently
    pub async fn aggregate(&self, chain: &ChainHandle) -> KeeperResult<AggregateState> {
        let staked_total = self
            .read(chain, "stakedTotal", |node| async move {
                node.aggregate_state().await.map(|s| s.staked_total)
            })
            .await?;
        let pending_total = self
            .read(chain, "pendingTotal", |node| async move {
                node.aggregate_state().await.map(|s| s.pending_total)
            })
            .await?;
        let supply_total = self
            .read(chain, "supplyTotal", |node| async move {
                node.aggregate_state().await.map(|s| s.supply_total)
            })
            .await?;

        Ok(AggregateState {
            staked_total,
            pending_total,
            supply_total,
        })
    }

    pub async fn snapshot(&self, chain: &ChainHandle) -> KeeperResult<ChainSnapshot> {
        Ok(ChainSnapshot {
            chain_id: chain.chain_id(),
            name: chain.name().to_string(),
            role: chain.descriptor.role,
            round: self.round(chain).await?,
            epoch: self.epoch(chain).await?,
            paused: self.paused(chain).await?,
        })
    }

    /// Poll a quorum read until `accept` holds for the agreed value.
    ///
    /// Quorum failures while nodes catch up are not fatal; they are kept as the last
    /// observation and reported if the wait times out.
    #[allow(clippy::too_many_arguments)]
    pub async fn wait_until<T, F, Fut, A>(
        &self,
        chain: &ChainHandle,
        query: &str,
        f: F,
        policy: &ConfirmationPolicy,
        operation: &str,
        expected: &str,
        accept: A,
    ) -> KeeperResult<T>
    where
        T: PartialEq + Clone + Debug,
        F: Fn(Arc<dyn VaultNode>) -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
        A: Fn(&T) -> bool,
    {
        let label = chain.label();
        let started = Instant::now();
        let mut last_observed = None;

        loop {
            match self.quorum.read_value(&label, query, &chain.nodes, &f).await {
                Ok(value) if accept(&value) => {
                    debug!("✅ {} {} confirmed after {:?}", label, operation, started.elapsed());
                    return Ok(value);
                }
                Ok(value) => last_observed = Some(format!("{:?}", value)),
                Err(e) if e.is_read_failure() => last_observed = Some(e.to_string()),
                Err(e) => return Err(e),
            }

            if started.elapsed() >= policy.timeout {
                return Err(KeeperError::WriteConfirmationTimeout {
                    chain: label,
                    operation: operation.to_string(),
                    expected: expected.to_string(),
                    waited: started.elapsed(),
                    last_observed,
                });
            }
            sleep(policy.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockNetwork, NodeBehavior};
    use crate::quorum::QuorumPolicy;

    fn reader() -> VerifiedReader {
        VerifiedReader::new(
            QuorumReader::new(QuorumPolicy::new(2, Duration::from_millis(200), true).unwrap()),
            RetryPolicy::no_retry(),
        )
    }

    fn fast_confirmation() -> ConfirmationPolicy {
        ConfirmationPolicy {
            timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_snapshot_outvotes_stale_node() {
        let network = MockNetwork::standard(1, 3);
        let registry = network.registry();
        let primary = registry.primary();
        network.set_behavior(primary.chain_id(), 2, NodeBehavior::Stale { round_lag: 1 }).await;

        let snapshot = reader().snapshot(primary).await.unwrap();
        assert_eq!(snapshot.round, 7);
        assert_eq!(snapshot.epoch, 7);
        assert!(!snapshot.paused);
        assert!(snapshot.is_paired());
    }

    #[tokio::test]
    async fn test_aggregate_is_read_per_field() {
        let network = MockNetwork::standard(1, 3);
        let registry = network.registry();
        let primary = registry.primary();

        let state = reader().aggregate(primary).await.unwrap();
        assert_eq!(state, network.chain(primary.chain_id()).await.aggregate);
    }

    #[tokio::test]
    async fn test_wait_until_times_out_with_last_observation() {
        let network = MockNetwork::standard(1, 3);
        let registry = network.registry();
        let primary = registry.primary();

        let err = reader()
            .wait_until(
                primary,
                "currentRound",
                |node| async move { node.current_round().await },
                &fast_confirmation(),
                "rollPrimary",
                "round 8",
                |round| *round == 8,
            )
            .await
            .unwrap_err();

        match err {
            KeeperError::WriteConfirmationTimeout { last_observed, operation, .. } => {
                assert_eq!(operation, "rollPrimary");
                assert_eq!(last_observed.as_deref(), Some("7"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_until_tolerates_interim_quorum_failure() {
        let network = MockNetwork::standard(1, 3);
        let registry = network.registry();
        let primary = registry.primary();
        let chain_id = primary.chain_id();
        for idx in 0..3 {
            network.set_behavior(chain_id, idx, NodeBehavior::Unreachable).await;
        }

        let healer = {
            let network = network.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(25)).await;
                for idx in 0..3 {
                    network.set_behavior(chain_id, idx, NodeBehavior::Honest).await;
                }
            })
        };

        let policy = ConfirmationPolicy {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        };
        let round = reader()
            .wait_until(
                primary,
                "currentRound",
                |node| async move { node.current_round().await },
                &policy,
                "rollPrimary",
                "round 7",
                |round| *round == 7,
            )
            .await
            .unwrap();
        assert_eq!(round, 7);
        healer.await.unwrap();
    }
}
