use std::collections::HashSet;
use std::sync::Arc;

use super::node::{VaultNode, VaultWriter};
use crate::error::{KeeperError, KeeperResult};
use crate::types::ChainDescriptor;

/// One chain with its read endpoints and its signer
#[derive(Debug, Clone)]
pub struct ChainHandle {
    pub descriptor: Arc<ChainDescriptor>,
    pub nodes: Vec<Arc<dyn VaultNode>>,
    pub writer: Arc<dyn VaultWriter>,
}

impl ChainHandle {
    pub fn new(descriptor: ChainDescriptor, nodes: Vec<Arc<dyn VaultNode>>, writer: Arc<dyn VaultWriter>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            nodes,
            writer,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.descriptor.chain_id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn label(&self) -> String {
        self.descriptor.label()
    }

    pub fn is_primary(&self) -> bool {
        self.descriptor.is_primary()
    }
}

/// Chain registry: every supported chain in configuration order.
///
/// Built once at start-up and only read afterwards.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainHandle>,
    primary: usize,
}

impl ChainRegistry {
    pub fn new(chains: Vec<ChainHandle>) -> KeeperResult<Self> {
        let primaries: Vec<usize> = chains
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary())
            .map(|(i, _)| i)
            .collect();
        if primaries.len() != 1 {
            return Err(KeeperError::InvalidTopology(format!(
                "exactly one primary chain required, found {}",
                primaries.len()
            )));
        }

        let mut ids = HashSet::new();
        let mut selectors = HashSet::new();
        for chain in &chains {
            if !ids.insert(chain.chain_id()) {
                return Err(KeeperError::InvalidTopology(format!("duplicate chain id {}", chain.chain_id())));
            }
            if !selectors.insert(chain.descriptor.selector) {
                return Err(KeeperError::InvalidTopology(format!(
                    "duplicate bridge selector {}",
                    chain.descriptor.selector
                )));
            }
            if chain.nodes.is_empty() {
                return Err(KeeperError::InvalidTopology(format!("{} has no endpoints", chain.label())));
            }
        }

        Ok(Self {
            chains,
            primary: primaries[0],
        })
    }

    pub fn chains(&self) -> &[ChainHandle] {
        &self.chains
    }

    pub fn primary(&self) -> &ChainHandle {
        &self.chains[self.primary]
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &ChainHandle> {
        self.chains.iter().filter(|c| !c.is_primary())
    }

    /// Primary first, then secondaries in registry order
    pub fn sync_order(&self) -> Vec<&ChainHandle> {
        std::iter::once(self.primary()).chain(self.secondaries()).collect()
    }

    pub fn get(&self, chain_id: u64) -> KeeperResult<&ChainHandle> {
        self.chains
            .iter()
            .find(|c| c.chain_id() == chain_id)
            .ok_or(KeeperError::UnknownChain(chain_id))
    }

    /// Ordered pairs of chains that both carry a bridge pool, minus `exclusions`
    pub fn bridge_pairs(&self, exclusions: &[(u64, u64)]) -> Vec<(&ChainHandle, &ChainHandle)> {
        let bridged: Vec<&ChainHandle> = self
            .chains
            .iter()
            .filter(|c| c.descriptor.contracts.bridge_pool.is_some())
            .collect();

        let mut pairs = Vec::new();
        for source in &bridged {
            for destination in &bridged {
                if source.chain_id() == destination.chain_id() {
                    continue;
                }
                if exclusions.contains(&(source.chain_id(), destination.chain_id())) {
                    continue;
                }
                pairs.push((*source, *destination));
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockNetwork;

    #[test]
    fn test_sync_order_puts_primary_first() {
        let network = MockNetwork::standard(3, 3);
        let registry = network.registry();

        let order: Vec<u64> = registry.sync_order().iter().map(|c| c.chain_id()).collect();
        assert_eq!(order[0], registry.primary().chain_id());
        assert_eq!(order.len(), 4);
        assert_eq!(registry.secondaries().count(), 3);
    }

    #[test]
    fn test_bridge_pairs_are_ordered_and_exclusions_apply() {
        let network = MockNetwork::standard(2, 3);
        let registry = network.registry();
        assert_eq!(registry.bridge_pairs(&[]).len(), 6);

        let a = registry.chains()[0].chain_id();
        let b = registry.chains()[1].chain_id();
        let pairs = registry.bridge_pairs(&[(a, b)]);
        assert_eq!(pairs.len(), 5);
        assert!(pairs.iter().any(|(s, d)| s.chain_id() == b && d.chain_id() == a));
    }

    #[test]
    fn test_rejects_two_primaries() {
        let network = MockNetwork::standard(1, 1);
        let mut chains = network.registry().chains().to_vec();
        let mut descriptor = (*chains[1].descriptor).clone();
        descriptor.role = crate::types::ChainRole::Primary;
        chains[1].descriptor = Arc::new(descriptor);

        assert!(matches!(ChainRegistry::new(chains), Err(KeeperError::InvalidTopology(_))));
    }

    #[test]
    fn test_unknown_chain() {
        let registry = MockNetwork::standard(1, 1).registry();
        assert!(matches!(registry.get(999_999), Err(KeeperError::UnknownChain(999_999))));
    }
}
