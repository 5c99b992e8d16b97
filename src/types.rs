use std::fmt;

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// Role of a chain in the vault topology
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    /// Computes the global share price
    Primary,
    /// Applies the price computed on the primary
    Secondary,
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainRole::Primary => write!(f, "primary"),
            ChainRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// A node that can answer queries for one chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub chain_id: u64,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            url: url.into(),
            chain_id,
        }
    }

    /// Scheme and host only; provider URLs usually embed API keys in the path
    pub fn redacted(&self) -> String {
        match self.url.split_once("://") {
            Some((scheme, rest)) => {
                let host = rest.split(['/', '?']).next().unwrap_or(rest);
                format!("{}://{}", scheme, host)
            }
            None => self.url.split('/').next().unwrap_or(&self.url).to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// Contract addresses deployed on one chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractAddresses {
    /// Vault holding round/epoch state and the pause switch
    pub vault: Address,
    /// Share token (wrapper) bridged between chains
    pub share_token: Address,
    /// Bridge token pool; chains without one take no part in route reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_pool: Option<Address>,
    /// Token admin registry of the bridge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_registry: Option<Address>,
}

impl ContractAddresses {
    /// Every configured address with a short label, vault first
    pub fn labelled(&self) -> Vec<(&'static str, Address)> {
        let mut out = vec![("vault", self.vault), ("share_token", self.share_token)];
        if let Some(pool) = self.bridge_pool {
            out.push(("bridge_pool", pool));
        }
        if let Some(registry) = self.token_registry {
            out.push(("token_registry", registry));
        }
        out
    }
}

/// Identity of one supported chain. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub chain_id: u64,
    pub name: String,
    /// Bridge chain selector
    pub selector: u64,
    pub role: ChainRole,
    pub endpoints: Vec<Endpoint>,
    pub contracts: ContractAddresses,
}

impl ChainDescriptor {
    pub fn is_primary(&self) -> bool {
        self.role == ChainRole::Primary
    }

    pub fn label(&self) -> String {
        format!("{}({})", self.name, self.chain_id)
    }
}

/// Vault-wide figures read on the primary chain
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AggregateState {
    pub staked_total: U256,
    pub pending_total: U256,
    pub supply_total: U256,
}

/// Quorum-verified view of one chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub chain_id: u64,
    pub name: String,
    pub role: ChainRole,
    pub round: u64,
    pub epoch: u64,
    pub paused: bool,
}

impl ChainSnapshot {
    /// Round N must be paired with epoch N
    pub fn is_paired(&self) -> bool {
        self.round == self.epoch
    }
}

/// Route entry added to a bridge pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteAddition {
    pub remote_selector: u64,
    pub remote_pool: Address,
    pub remote_token: Address,
}

/// One remote pool registration read back from a bridge pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemotePool {
    Address(Address),
    /// Stored bytes that do not decode to an EVM address
    Unrecognised(Bytes),
}

impl RemotePool {
    pub fn address(&self) -> Option<Address> {
        match self {
            RemotePool::Address(address) => Some(*address),
            RemotePool::Unrecognised(_) => None,
        }
    }
}

impl fmt::Display for RemotePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemotePool::Address(address) => write!(f, "{:?}", address),
            RemotePool::Unrecognised(raw) => write!(f, "unrecognised 0x{}", hex::encode(raw)),
        }
    }
}

/// Result of a confirmed write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_redaction() {
        let endpoint = Endpoint::new("https://eth-mainnet.g.alchemy.com/v2/SECRET_KEY", 1);
        assert_eq!(endpoint.redacted(), "https://eth-mainnet.g.alchemy.com");

        let endpoint = Endpoint::new("http://127.0.0.1:8545?token=abc", 31337);
        assert_eq!(endpoint.redacted(), "http://127.0.0.1:8545");

        let endpoint = Endpoint::new("mock://arbitrum-0/rpc", 42161);
        assert_eq!(endpoint.to_string(), "mock://arbitrum-0");
    }

    #[test]
    fn test_labelled_addresses() {
        let contracts = ContractAddresses {
            vault: Address::from_low_u64_be(1),
            share_token: Address::from_low_u64_be(2),
            bridge_pool: Some(Address::from_low_u64_be(3)),
            token_registry: None,
        };

        let labels: Vec<_> = contracts.labelled().into_iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["vault", "share_token", "bridge_pool"]);
    }
}
