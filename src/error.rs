use std::time::Duration;

use ethers::types::Address;
use uuid::Uuid;

use crate::quorum::{EndpointReport, ValueCount};
use crate::sync::run_state::{ChainProgress, SyncStep};

/// Keeper result type
pub type KeeperResult<T> = Result<T, KeeperError>;

/// Failure of a single call against a single node
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("contract not deployed: {0}")]
    NotDeployed(String),

    #[error("no signer configured for writes")]
    SignerUnavailable,
}

impl NodeError {
    pub fn is_revert(&self) -> bool {
        matches!(self, NodeError::Reverted(_))
    }
}

/// Keeper errors
///
/// Every variant carries the raw per-endpoint or per-chain context that produced it.
/// Cross-chain divergence cannot be root-caused from a one-line summary.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error("{chain}: {query} failed on every endpoint [{}]", format_reports(.reports))]
    AllEndpointsUnreachable {
        chain: String,
        query: String,
        reports: Vec<EndpointReport>,
    },

    #[error(
        "{chain}: {query} consensus not reached (best group {agreement}/{successful} successful, need {required}{}) distribution [{}] endpoints [{}]",
        majority_suffix(.require_majority),
        format_distribution(.distribution),
        format_reports(.reports)
    )]
    ConsensusNotReached {
        chain: String,
        query: String,
        required: usize,
        require_majority: bool,
        agreement: usize,
        successful: usize,
        distribution: Vec<ValueCount>,
        reports: Vec<EndpointReport>,
    },

    #[error("{chain}: {operation} submitted but {expected} not observed within {waited:?} (last observed: {})", last_seen(.last_observed))]
    WriteConfirmationTimeout {
        chain: String,
        operation: String,
        expected: String,
        waited: Duration,
        last_observed: Option<String>,
    },

    #[error("run {run_id} halted during {step}: {cause} | progress [{}]", format_progress(.progress))]
    PartialRunHalted {
        run_id: Uuid,
        step: SyncStep,
        progress: Vec<ChainProgress>,
        #[source]
        cause: Box<KeeperError>,
    },

    #[error("route {source_chain} -> {destination_chain} misconfigured: expected pool {expected:?}, registered {actual:?}")]
    RouteMisconfigured {
        source_chain: String,
        destination_chain: String,
        expected: Address,
        actual: Option<Address>,
    },

    #[error("{source_chain}: routes to [{}] were removed and their re-add is not confirmed: {cause}", format_chains(.removed))]
    RepairIncomplete {
        source_chain: String,
        removed: Vec<String>,
        #[source]
        cause: Box<KeeperError>,
    },

    #[error("{chain}: {operation} write failed: {source}")]
    WriteFailed {
        chain: String,
        operation: String,
        #[source]
        source: NodeError,
    },

    #[error("{chain}: expected {counter} {expected}, observed {observed}")]
    UnexpectedCounter {
        chain: String,
        counter: &'static str,
        expected: u64,
        observed: u64,
    },

    #[error("chains disagree on round/epoch before starting a run: [{}]", format_counters(.observed))]
    RoundDivergence { observed: Vec<(String, u64, u64)> },

    #[error("{chain}: after completion round={round} epoch={epoch} paused={paused}, expected round=epoch={expected} unpaused")]
    PairingViolation {
        chain: String,
        round: u64,
        epoch: u64,
        paused: bool,
        expected: u64,
    },

    #[error("run {0} has no persisted price but the primary chain already moved past the price step")]
    MissingPrice(Uuid),

    #[error("invalid share price: {0}")]
    InvalidPrice(String),

    #[error("unknown chain id {0}")]
    UnknownChain(u64),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl KeeperError {
    /// Read failures the caller may choose to retry
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            KeeperError::AllEndpointsUnreachable { .. } | KeeperError::ConsensusNotReached { .. }
        )
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(e: serde_json::Error) -> Self {
        KeeperError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for KeeperError {
    fn from(e: std::io::Error) -> Self {
        KeeperError::Storage(e.to_string())
    }
}

impl From<redis::RedisError> for KeeperError {
    fn from(e: redis::RedisError) -> Self {
        KeeperError::Storage(e.to_string())
    }
}

fn majority_suffix(require_majority: &bool) -> &'static str {
    if *require_majority {
        " and a strict majority"
    } else {
        ""
    }
}

fn last_seen(last_observed: &Option<String>) -> &str {
    last_observed.as_deref().unwrap_or("nothing")
}

fn format_counters(observed: &[(String, u64, u64)]) -> String {
    observed
        .iter()
        .map(|(chain, round, epoch)| format!("{}: round {} epoch {}", chain, round, epoch))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_chains(chains: &[String]) -> String {
    chains.join(", ")
}

fn format_reports(reports: &[EndpointReport]) -> String {
    reports
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_distribution(distribution: &[ValueCount]) -> String {
    distribution
        .iter()
        .map(|v| format!("{} x{}", v.value, v.count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_progress(progress: &[ChainProgress]) -> String {
    progress
        .iter()
        .map(|p| format!("{}: {}", p.chain_name, p.stage))
        .collect::<Vec<_>>()
        .join(", ")
}
