pub mod chain_mock;

pub use chain_mock::{
    MockChainState, MockNetwork, MockRoute, MockVaultNode, MockWriter, NodeBehavior, PoolApi, WriteOp,
    WriterFaults, MOCK_START_ROUND,
};

use std::env;

/// Check if mock mode is enabled
pub fn is_mock_mode() -> bool {
    env::var("API_MODE").unwrap_or_default() == "mock"
}
