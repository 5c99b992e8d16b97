use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use tokio::sync::RwLock;
use tracing::debug;

use crate::blockchain::contracts::decode_remote_address;
use crate::blockchain::{ChainHandle, ChainRegistry, VaultNode, VaultWriter};
use crate::constants::price_precision;
use crate::error::{KeeperResult, NodeError};
use crate::types::{
    AggregateState, ChainDescriptor, ChainRole, ContractAddresses, Endpoint, RemotePool, RouteAddition, WriteReceipt,
};

/// Round and epoch every standard mock chain starts at
pub const MOCK_START_ROUND: u64 = 7;

/// (name, chain id, bridge selector); the first entry is the primary
const MOCK_CHAINS: &[(&str, u64, u64)] = &[
    ("ethereum", 1, 5009297550715157269),
    ("arbitrum", 42161, 4949039107694359620),
    ("base", 8453, 15971525489660198786),
    ("optimism", 10, 3734403246176062136),
    ("polygon", 137, 4051577828743386545),
    ("avalanche", 43114, 6433500567565415381),
];

/// Which deep-read interface the mock bridge pool exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolApi {
    /// `getRemotePools` and `getRemotePool` both answer
    Current,
    /// `getRemotePools` does not exist; `getRemotePool` reverts when nothing is set
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MockRoute {
    pub supported: bool,
    pub pools: Vec<Address>,
    pub token: Option<Address>,
    /// Registration bytes stored as is; when set they are read back instead of `pools`
    pub raw: Option<Bytes>,
}

impl MockRoute {
    fn registrations(&self) -> Vec<RemotePool> {
        match &self.raw {
            Some(raw) => decode_remote_address(raw).into_iter().collect(),
            None => self.pools.iter().copied().map(RemotePool::Address).collect(),
        }
    }
}

/// On-chain state of one mock chain, shared by all of its nodes and its writer
#[derive(Debug, Clone)]
pub struct MockChainState {
    pub round: u64,
    pub epoch: u64,
    pub paused: bool,
    pub aggregate: AggregateState,
    pub routes: HashMap<u64, MockRoute>,
    pub pool_api: PoolApi,
    pub applied_prices: Vec<U256>,
    /// Present only when the chain has a bridge pool
    pub has_pool: bool,
}

impl MockChainState {
    fn new(has_pool: bool) -> Self {
        let unit = price_precision();
        Self {
            round: MOCK_START_ROUND,
            epoch: MOCK_START_ROUND,
            paused: false,
            aggregate: AggregateState {
                staked_total: unit * U256::from(1_050u64),
                pending_total: unit * U256::from(20u64),
                supply_total: unit * U256::from(1_000u64),
            },
            routes: HashMap::new(),
            pool_api: PoolApi::Current,
            applied_prices: Vec::new(),
            has_pool,
        }
    }
}

/// How a single mock endpoint answers reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBehavior {
    Honest,
    /// Lags behind the chain head by `round_lag` rounds and epochs
    Stale { round_lag: u64 },
    Unreachable,
    /// Answers honestly after a delay
    Delayed(Duration),
    /// Reports another chain id, as a misrouted endpoint would
    WrongChain(u64),
}

#[derive(Debug, Clone)]
pub struct MockVaultNode {
    endpoint: Endpoint,
    state: Arc<RwLock<MockChainState>>,
    behavior: Arc<RwLock<NodeBehavior>>,
}

impl MockVaultNode {
    async fn view(&self) -> Result<MockChainState, NodeError> {
        let behavior = *self.behavior.read().await;
        match behavior {
            NodeBehavior::Unreachable => {
                return Err(NodeError::Transport(format!("{}: connection refused", self.endpoint)));
            }
            NodeBehavior::Delayed(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        let mut state = self.state.read().await.clone();
        if let NodeBehavior::Stale { round_lag } = behavior {
            state.round = state.round.saturating_sub(round_lag);
            state.epoch = state.epoch.saturating_sub(round_lag);
        }
        Ok(state)
    }

    fn require_pool(state: &MockChainState) -> Result<(), NodeError> {
        if state.has_pool {
            Ok(())
        } else {
            Err(NodeError::NotDeployed("bridge pool".to_string()))
        }
    }
}

#[async_trait]
impl VaultNode for MockVaultNode {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn chain_id(&self) -> Result<u64, NodeError> {
        let behavior = *self.behavior.read().await;
        self.view().await?;
        match behavior {
            NodeBehavior::WrongChain(other) => Ok(other),
            _ => Ok(self.endpoint.chain_id),
        }
    }

    async fn code_hash(&self, address: Address) -> Result<H256, NodeError> {
        self.view().await?;
        if address.is_zero() {
            return Ok(crate::constants::empty_code_hash());
        }
        Ok(H256::from(keccak256(address.as_bytes())))
    }

    async fn aggregate_state(&self) -> Result<AggregateState, NodeError> {
        Ok(self.view().await?.aggregate)
    }

    async fn current_round(&self) -> Result<u64, NodeError> {
        Ok(self.view().await?.round)
    }

    async fn current_epoch(&self) -> Result<u64, NodeError> {
        Ok(self.view().await?.epoch)
    }

    async fn is_paused(&self) -> Result<bool, NodeError> {
        Ok(self.view().await?.paused)
    }

    async fn is_supported_chain(&self, remote_selector: u64) -> Result<bool, NodeError> {
        let state = self.view().await?;
        Self::require_pool(&state)?;
        Ok(state.routes.get(&remote_selector).map(|r| r.supported).unwrap_or(false))
    }

    async fn get_remote_pools(&self, remote_selector: u64) -> Result<Vec<RemotePool>, NodeError> {
        let state = self.view().await?;
        Self::require_pool(&state)?;
        match state.pool_api {
            PoolApi::Current => Ok(state
                .routes
                .get(&remote_selector)
                .map(MockRoute::registrations)
                .unwrap_or_default()),
            PoolApi::Legacy => Err(NodeError::Reverted("function selector was not recognized".to_string())),
        }
    }

    async fn get_remote_pool(&self, remote_selector: u64) -> Result<Option<RemotePool>, NodeError> {
        let state = self.view().await?;
        Self::require_pool(&state)?;
        let pool = state
            .routes
            .get(&remote_selector)
            .and_then(|r| r.registrations().into_iter().next());
        match (state.pool_api, pool) {
            (PoolApi::Legacy, None) => Err(NodeError::Reverted("remote pool not set".to_string())),
            (_, pool) => Ok(pool),
        }
    }
}

/// Kind of write recorded by [`MockWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    RollPrimary,
    ApplySecondaryPrice,
    SettleWithdrawals,
    Pause,
    Unpause,
    ApplyChainUpdates,
}

/// Injected writer misbehaviour
#[derive(Debug, Clone, Default)]
pub struct WriterFaults {
    /// Reject the next write of this kind, then behave again
    pub fail_once: Option<WriteOp>,
    /// Rounds/epochs added by one roll or settlement
    pub round_step: Option<u64>,
    /// Accept writes without changing state, as a dropped transaction would
    pub silent: bool,
    /// Route updates are accepted but pool addresses are not stored
    pub drop_route_pools: bool,
    /// Route updates that add routes are rejected before submission
    pub reject_additions: bool,
}

#[derive(Debug)]
pub struct MockWriter {
    chain_id: u64,
    state: Arc<RwLock<MockChainState>>,
    log: Arc<RwLock<Vec<(u64, WriteOp)>>>,
    faults: Arc<RwLock<WriterFaults>>,
}

impl MockWriter {
    async fn begin(&self, op: WriteOp) -> Result<bool, NodeError> {
        let mut faults = self.faults.write().await;
        if faults.fail_once == Some(op) {
            faults.fail_once = None;
            return Err(NodeError::Transport(format!("{:?} rejected: nonce too low", op)));
        }
        self.log.write().await.push((self.chain_id, op));
        debug!("🎭 [MOCK] chain {} {:?}", self.chain_id, op);
        Ok(!faults.silent)
    }

    async fn step(&self) -> u64 {
        self.faults.read().await.round_step.unwrap_or(1)
    }

    fn receipt() -> WriteReceipt {
        WriteReceipt {
            tx_hash: H256::random(),
            block_number: None,
        }
    }

    async fn apply_price(&self, op: WriteOp, price: U256) -> Result<WriteReceipt, NodeError> {
        let apply = self.begin(op).await?;
        let step = self.step().await;
        let mut state = self.state.write().await;
        if !state.paused {
            return Err(NodeError::Reverted("vault is not paused".to_string()));
        }
        if apply {
            state.round += step;
            state.applied_prices.push(price);
        }
        Ok(Self::receipt())
    }
}

#[async_trait]
impl VaultWriter for MockWriter {
    async fn roll_primary(&self, price: U256) -> Result<WriteReceipt, NodeError> {
        self.apply_price(WriteOp::RollPrimary, price).await
    }

    async fn apply_secondary_price(&self, price: U256) -> Result<WriteReceipt, NodeError> {
        self.apply_price(WriteOp::ApplySecondaryPrice, price).await
    }

    async fn settle_withdrawals(&self) -> Result<WriteReceipt, NodeError> {
        let apply = self.begin(WriteOp::SettleWithdrawals).await?;
        let step = self.step().await;
        let mut state = self.state.write().await;
        if !state.paused {
            return Err(NodeError::Reverted("vault is not paused".to_string()));
        }
        if apply {
            state.epoch += step;
        }
        Ok(Self::receipt())
    }

    async fn set_paused(&self, paused: bool) -> Result<WriteReceipt, NodeError> {
        let op = if paused { WriteOp::Pause } else { WriteOp::Unpause };
        let apply = self.begin(op).await?;
        let mut state = self.state.write().await;
        if state.paused == paused {
            let reason = if paused { "Pausable: paused" } else { "Pausable: not paused" };
            return Err(NodeError::Reverted(reason.to_string()));
        }
        if apply {
            state.paused = paused;
        }
        Ok(Self::receipt())
    }

    async fn apply_chain_updates(&self, removals: &[u64], additions: &[RouteAddition]) -> Result<WriteReceipt, NodeError> {
        if !additions.is_empty() && self.faults.read().await.reject_additions {
            return Err(NodeError::Transport("ApplyChainUpdates rejected: nonce too low".to_string()));
        }
        let apply = self.begin(WriteOp::ApplyChainUpdates).await?;
        let drop_pools = self.faults.read().await.drop_route_pools;
        let mut state = self.state.write().await;
        if !state.has_pool {
            return Err(NodeError::NotDeployed("bridge pool".to_string()));
        }

        for selector in removals {
            if !state.routes.get(selector).map(|r| r.supported).unwrap_or(false) {
                return Err(NodeError::Reverted(format!("NonExistentChain({})", selector)));
            }
        }
        for addition in additions {
            let removed_here = removals.contains(&addition.remote_selector);
            let supported = state
                .routes
                .get(&addition.remote_selector)
                .map(|r| r.supported)
                .unwrap_or(false);
            if supported && !removed_here {
                return Err(NodeError::Reverted(format!("ChainAlreadyExists({})", addition.remote_selector)));
            }
        }
        if !apply {
            return Ok(Self::receipt());
        }

        for selector in removals {
            state.routes.remove(selector);
        }
        for addition in additions {
            state.routes.insert(
                addition.remote_selector,
                MockRoute {
                    supported: true,
                    pools: if drop_pools { Vec::new() } else { vec![addition.remote_pool] },
                    token: Some(addition.remote_token),
                    raw: None,
                },
            );
        }
        Ok(Self::receipt())
    }
}

#[derive(Debug, Clone)]
struct MockChain {
    descriptor: ChainDescriptor,
    state: Arc<RwLock<MockChainState>>,
    behaviors: Vec<Arc<RwLock<NodeBehavior>>>,
    faults: Arc<RwLock<WriterFaults>>,
}

/// A set of in-memory chains that share a write log
#[derive(Debug, Clone)]
pub struct MockNetwork {
    chains: Vec<MockChain>,
    log: Arc<RwLock<Vec<(u64, WriteOp)>>>,
}

impl MockNetwork {
    /// One primary plus `secondaries` secondary chains, `endpoints` nodes each.
    /// Every chain starts at round = epoch = [`MOCK_START_ROUND`], unpaused, with
    /// every bridge route fully configured.
    pub fn standard(secondaries: usize, endpoints: usize) -> Self {
        let descriptors: Vec<ChainDescriptor> = MOCK_CHAINS
            .iter()
            .take(secondaries + 1)
            .enumerate()
            .map(|(idx, (name, chain_id, selector))| mock_descriptor(name, *chain_id, *selector, idx == 0, endpoints))
            .collect();
        Self::from_descriptors(descriptors)
    }

    /// Mock state behind an existing topology
    pub fn from_descriptors(descriptors: Vec<ChainDescriptor>) -> Self {
        let remotes: Vec<(u64, Option<Address>, Address)> = descriptors
            .iter()
            .map(|d| (d.selector, d.contracts.bridge_pool, d.contracts.share_token))
            .collect();

        let chains = descriptors
            .into_iter()
            .map(|descriptor| {
                let mut state = MockChainState::new(descriptor.contracts.bridge_pool.is_some());
                if state.has_pool {
                    // fully meshed
                    for (selector, pool, token) in &remotes {
                        if let (true, Some(pool)) = (*selector != descriptor.selector, pool) {
                            state.routes.insert(
                                *selector,
                                MockRoute {
                                    supported: true,
                                    pools: vec![*pool],
                                    token: Some(*token),
                                    raw: None,
                                },
                            );
                        }
                    }
                }

                let behaviors = descriptor
                    .endpoints
                    .iter()
                    .map(|_| Arc::new(RwLock::new(NodeBehavior::Honest)))
                    .collect();
                MockChain {
                    descriptor,
                    state: Arc::new(RwLock::new(state)),
                    behaviors,
                    faults: Arc::new(RwLock::new(WriterFaults::default())),
                }
            })
            .collect();

        Self {
            chains,
            log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> ChainRegistry {
        self.try_registry().unwrap_or_else(|e| panic!("mock topology is invalid: {}", e))
    }

    pub fn try_registry(&self) -> KeeperResult<ChainRegistry> {
        let handles = self
            .chains
            .iter()
            .map(|chain| {
                let nodes: Vec<Arc<dyn VaultNode>> = chain
                    .descriptor
                    .endpoints
                    .iter()
                    .zip(&chain.behaviors)
                    .map(|(endpoint, behavior)| {
                        Arc::new(MockVaultNode {
                            endpoint: endpoint.clone(),
                            state: chain.state.clone(),
                            behavior: behavior.clone(),
                        }) as Arc<dyn VaultNode>
                    })
                    .collect();
                let writer: Arc<dyn VaultWriter> = Arc::new(MockWriter {
                    chain_id: chain.descriptor.chain_id,
                    state: chain.state.clone(),
                    log: self.log.clone(),
                    faults: chain.faults.clone(),
                });
                ChainHandle::new(chain.descriptor.clone(), nodes, writer)
            })
            .collect();
        ChainRegistry::new(handles)
    }

    fn find(&self, chain_id: u64) -> &MockChain {
        self.chains
            .iter()
            .find(|c| c.descriptor.chain_id == chain_id)
            .unwrap_or_else(|| panic!("no mock chain {}", chain_id))
    }

    pub fn selector(&self, chain_id: u64) -> u64 {
        self.find(chain_id).descriptor.selector
    }

    pub async fn chain(&self, chain_id: u64) -> MockChainState {
        self.find(chain_id).state.read().await.clone()
    }

    pub async fn update<F: FnOnce(&mut MockChainState)>(&self, chain_id: u64, f: F) {
        let mut state = self.find(chain_id).state.write().await;
        f(&mut state);
    }

    pub async fn set_behavior(&self, chain_id: u64, endpoint_idx: usize, behavior: NodeBehavior) {
        *self.find(chain_id).behaviors[endpoint_idx].write().await = behavior;
    }

    pub async fn set_faults(&self, chain_id: u64, faults: WriterFaults) {
        *self.find(chain_id).faults.write().await = faults;
    }

    pub async fn set_route(&self, chain_id: u64, remote_chain_id: u64, route: MockRoute) {
        let selector = self.selector(remote_chain_id);
        self.update(chain_id, |state| {
            state.routes.insert(selector, route);
        })
        .await;
    }

    pub async fn writes(&self) -> Vec<(u64, WriteOp)> {
        self.log.read().await.clone()
    }

    pub async fn writes_on(&self, chain_id: u64) -> Vec<WriteOp> {
        self.log
            .read()
            .await
            .iter()
            .filter(|(id, _)| *id == chain_id)
            .map(|(_, op)| *op)
            .collect()
    }

    pub async fn total_writes(&self) -> usize {
        self.log.read().await.len()
    }
}

fn mock_descriptor(name: &str, chain_id: u64, selector: u64, primary: bool, endpoints: usize) -> ChainDescriptor {
    let base = chain_id * 1_000;
    ChainDescriptor {
        chain_id,
        name: name.to_string(),
        selector,
        role: if primary { ChainRole::Primary } else { ChainRole::Secondary },
        endpoints: (0..endpoints)
            .map(|idx| Endpoint::new(format!("mock://{}-{}/rpc", name, idx), chain_id))
            .collect(),
        contracts: ContractAddresses {
            vault: Address::from_low_u64_be(base + 1),
            share_token: Address::from_low_u64_be(base + 2),
            bridge_pool: Some(Address::from_low_u64_be(base + 3)),
            token_registry: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_standard_network_is_meshed() {
        let network = MockNetwork::standard(2, 3);
        let state = network.chain(1).await;
        assert_eq!(state.routes.len(), 2);
        assert!(state.routes.values().all(|r| r.supported && r.pools.len() == 1));
        assert_eq!(state.round, MOCK_START_ROUND);
    }

    #[tokio::test]
    async fn test_writer_requires_pause_and_rejects_double_pause() {
        let network = MockNetwork::standard(1, 1);
        let registry = network.registry();
        let writer = &registry.primary().writer;

        let err = writer.roll_primary(U256::one()).await.unwrap_err();
        assert!(err.is_revert());

        writer.set_paused(true).await.unwrap();
        assert!(writer.set_paused(true).await.unwrap_err().is_revert());
        writer.roll_primary(U256::one()).await.unwrap();
        assert_eq!(network.chain(1).await.round, MOCK_START_ROUND + 1);
        assert_eq!(network.total_writes().await, 4);
    }

    #[tokio::test]
    async fn test_legacy_pool_reverts_when_unset() {
        let network = MockNetwork::standard(1, 1);
        let arbitrum = network.selector(42161);
        network
            .update(1, |state| {
                state.pool_api = PoolApi::Legacy;
                state.routes.clear();
            })
            .await;
        let registry = network.registry();
        let node = &registry.primary().nodes[0];

        assert!(node.get_remote_pools(arbitrum).await.unwrap_err().is_revert());
        assert!(node.get_remote_pool(arbitrum).await.unwrap_err().is_revert());
    }
}
