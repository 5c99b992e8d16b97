// xvault keeper library: round synchronization and bridge route reconciliation
// for a yield vault deployed on several chains.

pub mod blockchain;
pub mod bridges;
pub mod config;
pub mod mocks;
pub mod preflight;
pub mod quorum;
pub mod storage;
pub mod sync;

// Core types
pub mod constants;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use blockchain::{ChainHandle, ChainRegistry, VerifiedReader};
pub use bridges::{PendingRepair, ReconcileReport, RouteClass, RouteReconciler};
pub use config::KeeperConfig;
pub use error::{KeeperError, KeeperResult, NodeError};
pub use preflight::{run_preflight, PreflightReport};
pub use quorum::{QuorumPolicy, QuorumReader, RetryPolicy};
pub use storage::{open_repair_log, open_store, RepairLogStore, RunLogStore};
pub use sync::{RoundSyncController, RunState, SyncPolicy};
pub use types::{ChainDescriptor, ChainRole, ChainSnapshot};
