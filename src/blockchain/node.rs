use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};

use crate::error::NodeError;
use crate::quorum::QuorumSource;
use crate::types::{AggregateState, Endpoint, RemotePool, RouteAddition, WriteReceipt};

/// Read access to the vault and bridge pool contracts through one endpoint.
///
/// Every method must be free of side effects: the quorum engine may abandon a call
/// half way through.
#[async_trait]
pub trait VaultNode: Send + Sync + Debug {
    fn endpoint(&self) -> &Endpoint;

    /// Chain id reported by the node itself
    async fn chain_id(&self) -> Result<u64, NodeError>;

    /// keccak256 of the code deployed at `address`
    async fn code_hash(&self, address: Address) -> Result<H256, NodeError>;

    /// `aggregateState()` of the vault
    async fn aggregate_state(&self) -> Result<AggregateState, NodeError>;

    async fn current_round(&self) -> Result<u64, NodeError>;

    async fn current_epoch(&self) -> Result<u64, NodeError>;

    async fn is_paused(&self) -> Result<bool, NodeError>;

    /// Shallow route check on this chain's bridge pool
    async fn is_supported_chain(&self, remote_selector: u64) -> Result<bool, NodeError>;

    /// Deep route check, current pool interface
    async fn get_remote_pools(&self, remote_selector: u64) -> Result<Vec<RemotePool>, NodeError>;

    /// Deep route check, legacy single-pool interface. Some deployments revert when unset.
    async fn get_remote_pool(&self, remote_selector: u64) -> Result<Option<RemotePool>, NodeError>;
}

/// Signed writes against one chain. Each call returns once the transaction is mined.
#[async_trait]
pub trait VaultWriter: Send + Sync + Debug {
    async fn roll_primary(&self, price: U256) -> Result<WriteReceipt, NodeError>;

    async fn apply_secondary_price(&self, price: U256) -> Result<WriteReceipt, NodeError>;

    async fn settle_withdrawals(&self) -> Result<WriteReceipt, NodeError>;

    async fn set_paused(&self, paused: bool) -> Result<WriteReceipt, NodeError>;

    async fn apply_chain_updates(
        &self,
        removals: &[u64],
        additions: &[RouteAddition],
    ) -> Result<WriteReceipt, NodeError>;
}

impl QuorumSource for Arc<dyn VaultNode> {
    fn source_id(&self) -> String {
        self.endpoint().redacted()
    }
}

/// Writer used when no signer key is configured; read-only commands still work
#[derive(Debug, Default)]
pub struct ReadOnlyWriter;

#[async_trait]
impl VaultWriter for ReadOnlyWriter {
    async fn roll_primary(&self, _price: U256) -> Result<WriteReceipt, NodeError> {
        Err(NodeError::SignerUnavailable)
    }

    async fn apply_secondary_price(&self, _price: U256) -> Result<WriteReceipt, NodeError> {
        Err(NodeError::SignerUnavailable)
    }

    async fn settle_withdrawals(&self) -> Result<WriteReceipt, NodeError> {
        Err(NodeError::SignerUnavailable)
    }

    async fn set_paused(&self, _paused: bool) -> Result<WriteReceipt, NodeError> {
        Err(NodeError::SignerUnavailable)
    }

    async fn apply_chain_updates(&self, _removals: &[u64], _additions: &[RouteAddition]) -> Result<WriteReceipt, NodeError> {
        Err(NodeError::SignerUnavailable)
    }
}
