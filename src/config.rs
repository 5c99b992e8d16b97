use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Environment, File, FileFormat};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::blockchain::ConfirmationPolicy;
use crate::constants::{
    DEFAULT_CONFIRMATION_TIMEOUT_MS, DEFAULT_ENDPOINT_TIMEOUT_MS, DEFAULT_MIN_CONSENSUS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_ATTEMPTS, DEFAULT_READ_BACKOFF_MS, DEFAULT_REDIS_URL,
    DEFAULT_RUN_LOG_DIR, ENV_PREFIX, PRIVATE_KEY_ENV,
};
use crate::error::{KeeperError, KeeperResult};
use crate::quorum::{QuorumPolicy, RetryPolicy};
use crate::sync::SyncPolicy;
use crate::types::{ChainDescriptor, ChainRole, ContractAddresses, Endpoint};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuorumConfig {
    pub min_consensus: usize,
    pub timeout_ms: u64,
    pub require_majority: bool,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            min_consensus: DEFAULT_MIN_CONSENSUS,
            timeout_ms: DEFAULT_ENDPOINT_TIMEOUT_MS,
            require_majority: true,
        }
    }
}

/// Caller-side retries of failed quorum reads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_READ_ATTEMPTS,
            backoff_ms: DEFAULT_READ_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Redis,
    Memory,
}

/// Where run records are persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub run_log_dir: String,
    pub redis_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            run_log_dir: DEFAULT_RUN_LOG_DIR.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutesConfig {
    /// Ordered (source, destination) chain id pairs left out of reconciliation
    #[serde(default)]
    pub exclude: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    /// Bridge chain selector. Kept as a string: selectors overflow TOML integers.
    pub selector: String,
    pub role: ChainRole,
    pub endpoints: Vec<String>,
    pub contracts: ContractAddresses,
}

impl ChainConfig {
    pub fn selector(&self) -> Result<u64> {
        self.selector
            .trim()
            .parse::<u64>()
            .with_context(|| format!("chain {}: invalid selector {:?}", self.name, self.selector))
    }

    pub fn descriptor(&self) -> Result<ChainDescriptor> {
        Ok(ChainDescriptor {
            chain_id: self.chain_id,
            name: self.name.clone(),
            selector: self.selector()?,
            role: self.role,
            endpoints: self
                .endpoints
                .iter()
                .map(|url| Endpoint::new(url.clone(), self.chain_id))
                .collect(),
            contracts: self.contracts.clone(),
        })
    }
}

/// Keeper configuration: TOML file, then `KEEPER__SECTION__KEY` environment overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeeperConfig {
    #[serde(default)]
    pub quorum: QuorumConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
    pub chains: Vec<ChainConfig>,
}

impl KeeperConfig {
    pub async fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path))?;

        let config: KeeperConfig = config::Config::builder()
            .add_source(File::from_str(&content, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to layer config {}", path))?
            .try_deserialize()
            .with_context(|| format!("failed to parse config {}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: KeeperConfig = config::Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Template written by `keeper init`
    pub fn sample() -> Self {
        let chain = |name: &str, chain_id: u64, selector: &str, role: ChainRole, base: u64| ChainConfig {
            name: name.to_string(),
            chain_id,
            selector: selector.to_string(),
            role,
            endpoints: vec![
                format!("https://{}-rpc-1.example.org/YOUR_API_KEY", name),
                format!("https://{}-rpc-2.example.org/YOUR_API_KEY", name),
                format!("https://{}-rpc-3.example.org/YOUR_API_KEY", name),
            ],
            contracts: ContractAddresses {
                vault: Address::from_low_u64_be(base + 1),
                share_token: Address::from_low_u64_be(base + 2),
                bridge_pool: Some(Address::from_low_u64_be(base + 3)),
                token_registry: None,
            },
        };

        Self {
            quorum: QuorumConfig::default(),
            retry: RetryConfig::default(),
            confirmation: ConfirmationConfig::default(),
            storage: StorageConfig::default(),
            routes: RoutesConfig::default(),
            chains: vec![
                chain("ethereum", 1, "5009297550715157269", ChainRole::Primary, 0x1000),
                chain("arbitrum", 42161, "4949039107694359620", ChainRole::Secondary, 0x2000),
                chain("base", 8453, "15971525489660198786", ChainRole::Secondary, 0x3000),
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(anyhow!("at least one chain must be configured"));
        }

        let primaries = self.chains.iter().filter(|c| c.role == ChainRole::Primary).count();
        if primaries != 1 {
            return Err(anyhow!("exactly one primary chain required, found {}", primaries));
        }

        let mut ids = HashSet::new();
        let mut selectors = HashSet::new();
        for chain in &self.chains {
            if !ids.insert(chain.chain_id) {
                return Err(anyhow!("duplicate chain id {}", chain.chain_id));
            }
            if !selectors.insert(chain.selector()?) {
                return Err(anyhow!("duplicate selector {} on chain {}", chain.selector, chain.name));
            }
            if chain.endpoints.is_empty() {
                return Err(anyhow!("chain {} has no endpoints", chain.name));
            }
            if chain.endpoints.len() < self.quorum.min_consensus {
                return Err(anyhow!(
                    "chain {} has {} endpoints, fewer than min_consensus {}",
                    chain.name,
                    chain.endpoints.len(),
                    self.quorum.min_consensus
                ));
            }
            if chain.contracts.vault.is_zero() {
                return Err(anyhow!("chain {} has no vault address", chain.name));
            }
        }

        if self.quorum.min_consensus == 0 {
            return Err(anyhow!("quorum.min_consensus must be at least 1"));
        }
        if self.quorum.timeout_ms == 0 {
            return Err(anyhow!("quorum.timeout_ms must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.confirmation.timeout_ms == 0 || self.confirmation.poll_interval_ms == 0 {
            return Err(anyhow!("confirmation timeout and poll interval must be greater than 0"));
        }

        for (source, destination) in &self.routes.exclude {
            if !ids.contains(source) || !ids.contains(destination) {
                return Err(anyhow!("route exclusion {} -> {} names an unknown chain", source, destination));
            }
        }

        Ok(())
    }

    /// Chain descriptors in configuration order
    pub fn descriptors(&self) -> KeeperResult<Vec<ChainDescriptor>> {
        self.chains
            .iter()
            .map(|c| c.descriptor().map_err(|e| KeeperError::Config(e.to_string())))
            .collect()
    }

    pub fn sync_policy(&self) -> KeeperResult<SyncPolicy> {
        Ok(SyncPolicy {
            quorum: QuorumPolicy::new(
                self.quorum.min_consensus,
                Duration::from_millis(self.quorum.timeout_ms),
                self.quorum.require_majority,
            )?,
            retry: RetryPolicy::new(self.retry.max_attempts, Duration::from_millis(self.retry.backoff_ms)),
            confirmation: ConfirmationPolicy {
                timeout: Duration::from_millis(self.confirmation.timeout_ms),
                poll_interval: Duration::from_millis(self.confirmation.poll_interval_ms),
            },
        })
    }

    pub fn route_exclusions(&self) -> Vec<(u64, u64)> {
        self.routes.exclude.clone()
    }

    /// Signer key for writes; read-only operation when unset
    pub fn private_key() -> Option<String> {
        std::env::var(PRIVATE_KEY_ENV).ok().filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[quorum]
min_consensus = 2
timeout_ms = 4000
require_majority = false

[confirmation]
timeout_ms = 60000
poll_interval_ms = 1000

[routes]
exclude = [[1, 137]]

[[chains]]
name = "ethereum"
chain_id = 1
selector = "5009297550715157269"
role = "primary"
endpoints = ["https://a.example.org", "https://b.example.org"]

[chains.contracts]
vault = "0x0000000000000000000000000000000000001001"
share_token = "0x0000000000000000000000000000000000001002"
bridge_pool = "0x0000000000000000000000000000000000001003"

[[chains]]
name = "polygon"
chain_id = 137
selector = "4051577828743386545"
role = "secondary"
endpoints = ["https://c.example.org", "https://d.example.org"]

[chains.contracts]
vault = "0x0000000000000000000000000000000000002001"
share_token = "0x0000000000000000000000000000000000002002"
"#;

    #[test]
    fn test_parse_config() {
        let config = KeeperConfig::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.route_exclusions(), vec![(1, 137)]);

        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors[0].selector, 5009297550715157269);
        assert!(descriptors[0].is_primary());
        assert_eq!(descriptors[1].contracts.bridge_pool, None);
        assert_eq!(descriptors[1].endpoints[0].chain_id, 137);

        let policy = config.sync_policy().unwrap();
        assert_eq!(policy.quorum.timeout_per_endpoint, Duration::from_millis(4000));
        assert!(!policy.quorum.require_majority);
        assert_eq!(policy.confirmation.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_selector_above_i64() {
        let config = KeeperConfig::sample();
        let base = config.chains.iter().find(|c| c.name == "base").unwrap();
        assert_eq!(base.selector().unwrap(), 15971525489660198786);
    }

    #[test]
    fn test_config_validation() {
        assert!(KeeperConfig::sample().validate().is_ok());

        let mut two_primaries = KeeperConfig::sample();
        two_primaries.chains[1].role = ChainRole::Primary;
        assert!(two_primaries.validate().is_err());

        let mut duplicate_id = KeeperConfig::sample();
        duplicate_id.chains[2].chain_id = 42161;
        assert!(duplicate_id.validate().is_err());

        let mut duplicate_selector = KeeperConfig::sample();
        duplicate_selector.chains[2].selector = duplicate_selector.chains[1].selector.clone();
        assert!(duplicate_selector.validate().is_err());

        let mut too_few_endpoints = KeeperConfig::sample();
        too_few_endpoints.quorum.min_consensus = 4;
        assert!(too_few_endpoints.validate().is_err());

        let mut no_endpoints = KeeperConfig::sample();
        no_endpoints.chains[0].endpoints.clear();
        assert!(no_endpoints.validate().is_err());

        let mut zero_timeout = KeeperConfig::sample();
        zero_timeout.quorum.timeout_ms = 0;
        assert!(zero_timeout.validate().is_err());

        let mut bad_selector = KeeperConfig::sample();
        bad_selector.chains[0].selector = "ccip-eth".to_string();
        assert!(bad_selector.validate().is_err());

        let mut unknown_exclusion = KeeperConfig::sample();
        unknown_exclusion.routes.exclude = vec![(1, 999)];
        assert!(unknown_exclusion.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.toml");
        let path = path.to_str().unwrap();

        let config = KeeperConfig::sample();
        config.save(path).await.unwrap();
        let loaded = KeeperConfig::load(path).await.unwrap();

        assert_eq!(loaded.chains, config.chains);
        assert_eq!(loaded.quorum.min_consensus, config.quorum.min_consensus);
    }
}
