use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::blockchain::{ChainHandle, ChainRegistry, VerifiedReader};
use crate::constants::empty_code_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    /// A single endpoint misbehaves but the quorum still holds
    Warning,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "ok"),
            HealthStatus::Warning => write!(f, "WARN"),
            HealthStatus::Critical => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub chain: String,
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: HashMap<String, String>,
}

impl HealthCheck {
    pub fn new(chain: &ChainHandle, status: HealthStatus, message: String) -> Self {
        Self {
            chain: chain.label(),
            status,
            message,
            timestamp: Utc::now(),
            details: HashMap::new(),
        }
    }

    pub fn add_detail(&mut self, key: String, value: String) {
        self.details.insert(key, value);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<HealthCheck>,
}

impl PreflightReport {
    /// Worst status across all checks
    pub fn overall(&self) -> HealthStatus {
        self.checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn is_ready(&self) -> bool {
        self.overall() != HealthStatus::Critical
    }

    pub fn failures(&self) -> Vec<&HealthCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == HealthStatus::Critical)
            .collect()
    }
}

/// Verify the configured topology against what the endpoints serve.
///
/// Per chain: the quorum agrees on the configured chain id, every endpoint
/// individually reports it, and code is deployed at every configured address.
pub async fn run_preflight(registry: &ChainRegistry, reader: &VerifiedReader) -> PreflightReport {
    let mut report = PreflightReport::default();

    for chain in registry.chains() {
        info!("🔍 preflight {}", chain.label());
        report.checks.push(check_chain_id(chain, reader).await);
        report.checks.extend(check_endpoints(chain, reader).await);
        report.checks.extend(check_contracts(chain, reader).await);
    }

    for check in &report.checks {
        match check.status {
            HealthStatus::Healthy => {}
            HealthStatus::Warning => warn!("⚠️ {}: {}", check.chain, check.message),
            HealthStatus::Critical => error!("❌ {}: {}", check.chain, check.message),
        }
    }
    report
}

async fn check_chain_id(chain: &ChainHandle, reader: &VerifiedReader) -> HealthCheck {
    let expected = chain.chain_id();
    match reader.chain_id(chain).await {
        Ok(id) if id == expected => HealthCheck::new(chain, HealthStatus::Healthy, format!("quorum chain id {}", id)),
        Ok(id) => HealthCheck::new(
            chain,
            HealthStatus::Critical,
            format!("quorum reports chain id {}, configured {}", id, expected),
        ),
        Err(e) => HealthCheck::new(chain, HealthStatus::Critical, format!("chain id read failed: {}", e)),
    }
}

/// One check per endpoint that disagrees with the configured chain id
async fn check_endpoints(chain: &ChainHandle, reader: &VerifiedReader) -> Vec<HealthCheck> {
    let expected = chain.chain_id();
    let limit = reader.quorum().policy().timeout_per_endpoint;

    let answers = join_all(chain.nodes.iter().map(|node| async move {
        let outcome = match timeout(limit, node.chain_id()).await {
            Ok(Ok(id)) if id == expected => None,
            Ok(Ok(id)) => Some(format!("reports chain id {}", id)),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("no answer within {:?}", limit)),
        };
        (node.endpoint().redacted(), outcome)
    }))
    .await;

    answers
        .into_iter()
        .filter_map(|(endpoint, problem)| {
            problem.map(|problem| {
                let mut check = HealthCheck::new(chain, HealthStatus::Warning, format!("endpoint {}: {}", endpoint, problem));
                check.add_detail("endpoint".to_string(), endpoint);
                check
            })
        })
        .collect()
}

async fn check_contracts(chain: &ChainHandle, reader: &VerifiedReader) -> Vec<HealthCheck> {
    let empty = empty_code_hash();
    let mut checks = Vec::new();

    for (name, address) in chain.descriptor.contracts.labelled() {
        let mut check = match reader.code_hash(chain, address).await {
            Ok(hash) if hash == empty || hash.is_zero() => HealthCheck::new(
                chain,
                HealthStatus::Critical,
                format!("no code at {} {:?}", name, address),
            ),
            Ok(_) => HealthCheck::new(chain, HealthStatus::Healthy, format!("{} deployed", name)),
            Err(e) => HealthCheck::new(chain, HealthStatus::Critical, format!("{} code read failed: {}", name, e)),
        };
        check.add_detail("contract".to_string(), name.to_string());
        check.add_detail("address".to_string(), format!("{:?}", address));
        checks.push(check);
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ethers::types::Address;

    use crate::mocks::{MockNetwork, NodeBehavior};
    use crate::quorum::{QuorumPolicy, QuorumReader, RetryPolicy};

    fn reader() -> VerifiedReader {
        VerifiedReader::new(
            QuorumReader::new(QuorumPolicy::new(2, Duration::from_millis(200), true).unwrap()),
            RetryPolicy::no_retry(),
        )
    }

    #[tokio::test]
    async fn test_preflight_healthy_network() {
        let network = MockNetwork::standard(2, 3);
        let report = run_preflight(&network.registry(), &reader()).await;

        assert_eq!(report.overall(), HealthStatus::Healthy);
        assert!(report.is_ready());
    }

    #[tokio::test]
    async fn test_single_wrong_chain_endpoint_is_a_warning() {
        let network = MockNetwork::standard(1, 3);
        network.set_behavior(42161, 2, NodeBehavior::WrongChain(10)).await;

        let report = run_preflight(&network.registry(), &reader()).await;

        assert_eq!(report.overall(), HealthStatus::Warning);
        assert!(report.is_ready());
        let warning = report.checks.iter().find(|c| c.status == HealthStatus::Warning).unwrap();
        assert_eq!(warning.chain, "arbitrum(42161)");
        assert!(warning.message.contains("reports chain id 10"));
    }

    #[tokio::test]
    async fn test_misrouted_quorum_is_critical() {
        let network = MockNetwork::standard(1, 3);
        network.set_behavior(42161, 0, NodeBehavior::WrongChain(10)).await;
        network.set_behavior(42161, 1, NodeBehavior::WrongChain(10)).await;

        let report = run_preflight(&network.registry(), &reader()).await;

        assert!(!report.is_ready());
        assert!(report
            .failures()
            .iter()
            .any(|c| c.message.contains("quorum reports chain id 10")));
    }

    #[tokio::test]
    async fn test_missing_contract_is_critical() {
        let mut descriptors: Vec<_> = MockNetwork::standard(1, 2)
            .registry()
            .chains()
            .iter()
            .map(|c| (*c.descriptor).clone())
            .collect();
        descriptors[1].contracts.share_token = Address::zero();
        let network = MockNetwork::from_descriptors(descriptors);

        let report = run_preflight(&network.registry(), &reader()).await;

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].details.get("contract").map(String::as_str), Some("share_token"));
    }
}
