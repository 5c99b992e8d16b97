use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::{
    abi::{Abi, Token},
    contract::{Contract, ContractError},
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, TransactionRequest, H256, U256},
    utils::keccak256,
};
use tracing::{debug, info, warn};

use super::contracts::{
    chain_update_tokens, counter_to_u64, decode_remote_address, encode_call, pool_abi, vault_abi,
};
use super::node::{ReadOnlyWriter, VaultNode, VaultWriter};
use super::registry::ChainHandle;
use crate::error::{KeeperError, KeeperResult, NodeError};
use crate::types::{AggregateState, ChainDescriptor, Endpoint, RemotePool, RouteAddition, WriteReceipt};

fn call_error<M: Middleware>(e: ContractError<M>) -> NodeError {
    if e.is_revert() {
        NodeError::Reverted(e.to_string())
    } else if matches!(e, ContractError::DetokenizationError(_) | ContractError::AbiError(_)) {
        NodeError::Decode(e.to_string())
    } else {
        NodeError::Transport(e.to_string())
    }
}

/// Vault reads through one HTTP endpoint
#[derive(Debug)]
pub struct EthersVaultNode {
    endpoint: Endpoint,
    provider: Arc<Provider<Http>>,
    vault: Contract<Provider<Http>>,
    pool: Option<Contract<Provider<Http>>>,
}

impl EthersVaultNode {
    pub fn new(endpoint: Endpoint, descriptor: &ChainDescriptor, vault_abi: Abi, pool_abi: Abi) -> Result<Self, NodeError> {
        let provider = Provider::<Http>::try_from(endpoint.url.as_str())
            .map_err(|e| NodeError::Transport(format!("{}: {}", endpoint, e)))?
            .interval(Duration::from_millis(500));
        let provider = Arc::new(provider);

        let vault = Contract::new(descriptor.contracts.vault, vault_abi, provider.clone());
        let pool = descriptor
            .contracts
            .bridge_pool
            .map(|address| Contract::new(address, pool_abi, provider.clone()));

        Ok(Self {
            endpoint,
            provider,
            vault,
            pool,
        })
    }

    fn pool(&self) -> Result<&Contract<Provider<Http>>, NodeError> {
        self.pool
            .as_ref()
            .ok_or_else(|| NodeError::NotDeployed(format!("no bridge pool configured for chain {}", self.endpoint.chain_id)))
    }

    async fn counter(&self, name: &str) -> Result<u64, NodeError> {
        let value: U256 = self
            .vault
            .method::<_, U256>(name, ())
            .map_err(|e| NodeError::Decode(e.to_string()))?
            .call()
            .await
            .map_err(call_error)?;
        counter_to_u64(name, value)
    }
}

#[async_trait]
impl VaultNode for EthersVaultNode {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn chain_id(&self) -> Result<u64, NodeError> {
        let id = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        counter_to_u64("chainId", id)
    }

    async fn code_hash(&self, address: Address) -> Result<H256, NodeError> {
        let code = self
            .provider
            .get_code(address, None)
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        Ok(H256::from(keccak256(code.as_ref())))
    }

    async fn aggregate_state(&self) -> Result<AggregateState, NodeError> {
        let (staked_total, pending_total, supply_total): (U256, U256, U256) = self
            .vault
            .method("aggregateState", ())
            .map_err(|e| NodeError::Decode(e.to_string()))?
            .call()
            .await
            .map_err(call_error)?;

        Ok(AggregateState {
            staked_total,
            pending_total,
            supply_total,
        })
    }

    async fn current_round(&self) -> Result<u64, NodeError> {
        self.counter("currentRound").await
    }

    async fn current_epoch(&self) -> Result<u64, NodeError> {
        self.counter("currentEpoch").await
    }

    async fn is_paused(&self) -> Result<bool, NodeError> {
        self.vault
            .method::<_, bool>("paused", ())
            .map_err(|e| NodeError::Decode(e.to_string()))?
            .call()
            .await
            .map_err(call_error)
    }

    async fn is_supported_chain(&self, remote_selector: u64) -> Result<bool, NodeError> {
        self.pool()?
            .method::<_, bool>("isSupportedChain", remote_selector)
            .map_err(|e| NodeError::Decode(e.to_string()))?
            .call()
            .await
            .map_err(call_error)
    }

    async fn get_remote_pools(&self, remote_selector: u64) -> Result<Vec<RemotePool>, NodeError> {
        let raw: Vec<Bytes> = self
            .pool()?
            .method("getRemotePools", remote_selector)
            .map_err(|e| NodeError::Decode(e.to_string()))?
            .call()
            .await
            .map_err(call_error)?;

        Ok(raw.iter().filter_map(|entry| decode_remote_address(entry)).collect())
    }

    async fn get_remote_pool(&self, remote_selector: u64) -> Result<Option<RemotePool>, NodeError> {
        let raw: Bytes = self
            .pool()?
            .method("getRemotePool", remote_selector)
            .map_err(|e| NodeError::Decode(e.to_string()))?
            .call()
            .await
            .map_err(call_error)?;
        Ok(decode_remote_address(&raw))
    }
}

type SignedClient = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

/// Signed writes to one chain's vault and bridge pool
#[derive(Debug)]
pub struct EthersVaultWriter {
    chain: String,
    client: Arc<SignedClient>,
    vault: Address,
    pool: Option<Address>,
    vault_abi: Abi,
    pool_abi: Abi,
}

impl EthersVaultWriter {
    pub fn new(
        descriptor: &ChainDescriptor,
        provider: Arc<Provider<Http>>,
        private_key: &str,
        vault_abi: Abi,
        pool_abi: Abi,
    ) -> KeeperResult<Self> {
        let wallet: LocalWallet = private_key
            .parse()
            .map_err(|e| KeeperError::Config(format!("Invalid private key: {}", e)))?;
        let wallet = wallet.with_chain_id(descriptor.chain_id);
        info!("🔑 {} signer: {}", descriptor.label(), wallet.address());

        Ok(Self {
            chain: descriptor.label(),
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            vault: descriptor.contracts.vault,
            pool: descriptor.contracts.bridge_pool,
            vault_abi,
            pool_abi,
        })
    }

    /// Send and wait for the receipt; a mined-but-failed transaction is a revert
    async fn submit(&self, to: Address, operation: &str, data: Bytes) -> Result<WriteReceipt, NodeError> {
        info!("📤 {} {} -> {:?}", self.chain, operation, to);
        let tx = TransactionRequest::new().to(to).data(data);

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("revert") {
                    NodeError::Reverted(message)
                } else {
                    NodeError::Transport(message)
                }
            })?;
        let tx_hash = *pending;
        debug!("⏳ {} {} submitted: {:?}", self.chain, operation, tx_hash);

        let receipt = pending
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?
            .ok_or_else(|| NodeError::Transport(format!("{:?} dropped from mempool", tx_hash)))?;

        if receipt.status.map(|s| s.is_zero()).unwrap_or(false) {
            warn!("❌ {} {} reverted in block {:?}", self.chain, operation, receipt.block_number);
            return Err(NodeError::Reverted(format!("{:?} reverted", tx_hash)));
        }

        info!("✅ {} {} mined in block {:?}", self.chain, operation, receipt.block_number);
        Ok(WriteReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
        })
    }

    async fn vault_call(&self, name: &str, tokens: &[Token]) -> Result<WriteReceipt, NodeError> {
        let data = encode_call(&self.vault_abi, name, tokens)?;
        self.submit(self.vault, name, data).await
    }
}

#[async_trait]
impl VaultWriter for EthersVaultWriter {
    async fn roll_primary(&self, price: U256) -> Result<WriteReceipt, NodeError> {
        self.vault_call("rollPrimary", &[Token::Uint(price)]).await
    }

    async fn apply_secondary_price(&self, price: U256) -> Result<WriteReceipt, NodeError> {
        self.vault_call("applySecondaryPrice", &[Token::Uint(price)]).await
    }

    async fn settle_withdrawals(&self) -> Result<WriteReceipt, NodeError> {
        self.vault_call("settleWithdrawals", &[]).await
    }

    async fn set_paused(&self, paused: bool) -> Result<WriteReceipt, NodeError> {
        let name = if paused { "pause" } else { "unpause" };
        self.vault_call(name, &[]).await
    }

    async fn apply_chain_updates(&self, removals: &[u64], additions: &[RouteAddition]) -> Result<WriteReceipt, NodeError> {
        let pool = self
            .pool
            .ok_or_else(|| NodeError::NotDeployed(format!("no bridge pool configured for {}", self.chain)))?;
        let data = encode_call(&self.pool_abi, "applyChainUpdates", &chain_update_tokens(removals, additions))?;
        self.submit(pool, "applyChainUpdates", data).await
    }
}

/// Build the handle for one configured chain: one node per endpoint, and a signer
/// on the first endpoint when a key is available.
pub fn connect_chain(descriptor: ChainDescriptor, private_key: Option<&str>) -> KeeperResult<ChainHandle> {
    let vault_abi = vault_abi().map_err(|e| KeeperError::Config(e.to_string()))?;
    let pool_abi = pool_abi().map_err(|e| KeeperError::Config(e.to_string()))?;

    let mut nodes: Vec<Arc<dyn VaultNode>> = Vec::with_capacity(descriptor.endpoints.len());
    for endpoint in &descriptor.endpoints {
        let node = EthersVaultNode::new(endpoint.clone(), &descriptor, vault_abi.clone(), pool_abi.clone())
            .map_err(|e| KeeperError::Config(e.to_string()))?;
        nodes.push(Arc::new(node));
    }

    let writer: Arc<dyn VaultWriter> = match (private_key, descriptor.endpoints.first()) {
        (Some(key), Some(endpoint)) => {
            let provider = Provider::<Http>::try_from(endpoint.url.as_str())
                .map_err(|e| KeeperError::Config(format!("{}: {}", endpoint, e)))?;
            Arc::new(EthersVaultWriter::new(&descriptor, Arc::new(provider), key, vault_abi, pool_abi)?)
        }
        _ => {
            warn!("⚠️ {}: no private key - read-only mode", descriptor.label());
            Arc::new(ReadOnlyWriter)
        }
    };

    info!("🔌 {} connected with {} endpoints", descriptor.label(), nodes.len());
    Ok(ChainHandle::new(descriptor, nodes, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainRole, ContractAddresses};

    fn descriptor(pool: Option<Address>) -> ChainDescriptor {
        ChainDescriptor {
            chain_id: 8453,
            name: "base".to_string(),
            selector: 15971525489660198786,
            role: ChainRole::Secondary,
            endpoints: vec![
                Endpoint::new("http://127.0.0.1:18545", 8453),
                Endpoint::new("http://127.0.0.1:18546", 8453),
            ],
            contracts: ContractAddresses {
                vault: Address::from_low_u64_be(1),
                share_token: Address::from_low_u64_be(2),
                bridge_pool: pool,
                token_registry: None,
            },
        }
    }

    #[test]
    fn test_connect_without_key_is_read_only() {
        let handle = connect_chain(descriptor(None), None).unwrap();
        assert_eq!(handle.nodes.len(), 2);
        assert_eq!(handle.nodes[1].endpoint().url, "http://127.0.0.1:18546");
    }

    #[tokio::test]
    async fn test_read_only_writer_refuses() {
        let handle = connect_chain(descriptor(None), None).unwrap();
        let err = handle.writer.set_paused(true).await.unwrap_err();
        assert_eq!(err, NodeError::SignerUnavailable);
    }

    #[tokio::test]
    async fn test_pool_reads_need_a_pool() {
        let handle = connect_chain(descriptor(None), None).unwrap();
        let err = handle.nodes[0].is_supported_chain(1).await.unwrap_err();
        assert!(matches!(err, NodeError::NotDeployed(_)));
    }

    #[test]
    fn test_bad_key_rejected() {
        let result = connect_chain(descriptor(None), Some("not-a-key"));
        assert!(matches!(result, Err(KeeperError::Config(_))));
    }
}
