use ethers::types::{H256, U256};
use ethers::utils::keccak256;

// Quorum defaults
pub const DEFAULT_MIN_CONSENSUS: usize = 2;
pub const DEFAULT_ENDPOINT_TIMEOUT_MS: u64 = 5_000;

// Caller-side read retries (1 = no retry)
pub const DEFAULT_READ_ATTEMPTS: u32 = 1;
pub const DEFAULT_READ_BACKOFF_MS: u64 = 1_000;

// Write confirmation
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 180_000; // 3 minutes
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

// Run log
pub const DEFAULT_RUN_LOG_DIR: &str = "runs";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const REDIS_RUN_KEY_PREFIX: &str = "xvault:runs";
pub const REDIS_REPAIR_KEY: &str = "xvault:route-repairs";
/// Subdirectory of the run log directory holding pending route repairs
pub const REPAIR_LOG_SUBDIR: &str = "route-repairs";

// Environment
pub const ENV_PREFIX: &str = "KEEPER";
pub const PRIVATE_KEY_ENV: &str = "KEEPER_PRIVATE_KEY";

/// Share prices carry 18 decimals
pub const PRICE_DECIMALS: usize = 18;

pub fn price_precision() -> U256 {
    U256::exp10(PRICE_DECIMALS)
}

/// keccak256 of empty bytecode, what `extcodehash` reports for an account without code
pub fn empty_code_hash() -> H256 {
    H256::from(keccak256([]))
}
