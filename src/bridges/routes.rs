use std::fmt;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::types::RemotePool;

/// Deep-read interfaces a bridge pool may expose, tried in this order.
///
/// A shape whose call reverts is not implemented by the deployed pool and the next
/// one is tried. The first shape that answers is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolCallShape {
    /// `getRemotePools(uint64) returns (bytes[])`
    RemotePools,
    /// `getRemotePool(uint64) returns (bytes)`
    RemotePool,
}

pub const CALL_SHAPES: [PoolCallShape; 2] = [PoolCallShape::RemotePools, PoolCallShape::RemotePool];

impl PoolCallShape {
    pub fn name(&self) -> &'static str {
        match self {
            PoolCallShape::RemotePools => "getRemotePools",
            PoolCallShape::RemotePool => "getRemotePool",
        }
    }
}

/// What one call shape returned, agreed across endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolLookup {
    Answered(Vec<RemotePool>),
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Absence {
    /// The authoritative shape answered with nothing
    Empty,
    /// No shape answered
    AllReverted,
}

/// Result of the deep remote-pool check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeepCheck {
    Registered { shape: PoolCallShape, pools: Vec<RemotePool> },
    Absent(Absence),
}

impl DeepCheck {
    pub fn pools(&self) -> &[RemotePool] {
        match self {
            DeepCheck::Registered { pools, .. } => pools,
            DeepCheck::Absent(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteClass {
    /// Supported flag is false; reported, never repaired
    NotConfigured,
    /// Flag set but the deep check is absent, points elsewhere or is unreadable
    Misconfigured,
    Configured,
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteClass::NotConfigured => write!(f, "not configured"),
            RouteClass::Misconfigured => write!(f, "MISCONFIGURED"),
            RouteClass::Configured => write!(f, "configured"),
        }
    }
}

pub fn classify(supported: bool, deep: &DeepCheck, expected_pool: Address) -> RouteClass {
    if !supported {
        return RouteClass::NotConfigured;
    }
    if deep.pools().contains(&RemotePool::Address(expected_pool)) {
        RouteClass::Configured
    } else {
        RouteClass::Misconfigured
    }
}

/// Configuration of the ordered pair source -> destination, as seen on the source pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStatus {
    pub source_chain_id: u64,
    pub source: String,
    pub destination_chain_id: u64,
    pub destination: String,
    pub supported: bool,
    pub deep: DeepCheck,
    pub expected_pool: Address,
    pub class: RouteClass,
}

impl RouteStatus {
    /// First registered pool that decodes to an address
    pub fn actual_pool(&self) -> Option<Address> {
        self.deep.pools().iter().find_map(RemotePool::address)
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.source, self.destination, self.class)?;
        match &self.deep {
            DeepCheck::Registered { shape, pools } => {
                let pools: Vec<String> = pools.iter().map(|p| p.to_string()).collect();
                write!(f, " (supported={}, {} -> [{}])", self.supported, shape.name(), pools.join(", "))
            }
            DeepCheck::Absent(absence) => write!(f, " (supported={}, deep check {:?})", self.supported, absence),
        }
    }
}
