//! Configuration for the sequencer

use crate::types::{decimal, Address, Balance};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Sequencer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Typed-data signing domain
    pub domain: DomainConfig,

    /// Account initialization policy
    pub accounts: AccountsConfig,

    /// Batching configuration
    pub batching: BatchingConfig,

    /// Anchor connection
    pub anchor: AnchorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "rollup-sequencer".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            domain: DomainConfig::default(),
            accounts: AccountsConfig::default(),
            batching: BatchingConfig::default(),
            anchor: AnchorConfig::default(),
        }
    }
}

/// Typed-data domain every transfer signature is scoped to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainConfig {
    /// Domain name
    pub name: String,

    /// Domain version
    pub version: String,

    /// Chain id (Sepolia by default)
    pub chain_id: u64,

    /// Token contract the transfer payload targets
    pub verifying_contract: Address,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "Token".to_string(),
            version: "1".to_string(),
            chain_id: 11_155_111,
            verifying_contract: Address::from_bytes([
                0xba, 0xfc, 0xe0, 0x1f, 0x99, 0x0e, 0x75, 0xcb, 0x6b, 0xad,
                0x12, 0x7a, 0xd9, 0xda, 0xff, 0x3e, 0xa3, 0x90, 0x14, 0x30,
            ]),
        }
    }
}

/// Account initialization policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Balance a new account starts with, in base units
    #[serde(with = "decimal")]
    pub initial_balance: Balance,

    /// Accounts present at genesis
    pub participants: Vec<Address>,

    /// Seed unknown addresses on first reference instead of rejecting them
    pub open_enrollment: bool,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            initial_balance: 100,
            participants: Vec::new(),
            open_enrollment: true,
        }
    }
}

/// Batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Pending transactions that trigger a commit
    pub commit_threshold: usize,

    /// Retry period for a ready batch whose commit failed (milliseconds)
    pub retry_interval_ms: u64,

    /// Actor mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            commit_threshold: 3,
            retry_interval_ms: 5_000,
            mailbox_capacity: 1_000,
        }
    }
}

/// Anchor connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// JSON-RPC gateway endpoint
    pub endpoint: String,

    /// Rollup contract the sequencer commits to
    pub contract_address: Address,

    /// Per-call deadline (milliseconds)
    pub timeout_ms: u64,

    /// Bearer credential; environment only
    #[serde(skip)]
    pub credential: Option<String>,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545".to_string(),
            contract_address: Address::from_bytes([
                0x6e, 0xad, 0x8d, 0x93, 0xdd, 0x09, 0xe6, 0xe6, 0x86, 0x72,
                0xd8, 0xfb, 0x0d, 0x8f, 0xca, 0xbb, 0x1c, 0x8e, 0x81, 0x6f,
            ]),
            timeout_ms: 10_000,
            credential: None,
        }
    }
}

impl AnchorConfig {
    /// Per-call deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.anchor.credential = std::env::var("SEQUENCER_ANCHOR_CREDENTIAL").ok();
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(endpoint) = std::env::var("SEQUENCER_ANCHOR_ENDPOINT") {
            config.anchor.endpoint = endpoint;
        }

        if let Ok(address) = std::env::var("SEQUENCER_ANCHOR_CONTRACT") {
            config.anchor.contract_address = Address::from_str(&address)
                .map_err(|e| crate::Error::Config(format!("SEQUENCER_ANCHOR_CONTRACT: {}", e)))?;
        }

        if let Ok(address) = std::env::var("SEQUENCER_TOKEN_ADDRESS") {
            config.domain.verifying_contract = Address::from_str(&address)
                .map_err(|e| crate::Error::Config(format!("SEQUENCER_TOKEN_ADDRESS: {}", e)))?;
        }

        if let Ok(chain_id) = std::env::var("SEQUENCER_CHAIN_ID") {
            config.domain.chain_id = chain_id
                .parse()
                .map_err(|e| crate::Error::Config(format!("SEQUENCER_CHAIN_ID: {}", e)))?;
        }

        if let Ok(participants) = std::env::var("SEQUENCER_PARTICIPANTS") {
            config.accounts.participants = participants
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Address::from_str)
                .collect::<crate::Result<Vec<_>>>()
                .map_err(|e| crate::Error::Config(format!("SEQUENCER_PARTICIPANTS: {}", e)))?;
        }

        if let Ok(balance) = std::env::var("SEQUENCER_INITIAL_BALANCE") {
            config.accounts.initial_balance = balance
                .trim()
                .parse()
                .map_err(|e| crate::Error::Config(format!("SEQUENCER_INITIAL_BALANCE: {}", e)))?;
        }

        if let Ok(threshold) = std::env::var("SEQUENCER_COMMIT_THRESHOLD") {
            config.batching.commit_threshold = threshold
                .parse()
                .map_err(|e| crate::Error::Config(format!("SEQUENCER_COMMIT_THRESHOLD: {}", e)))?;
        }

        config.anchor.credential = std::env::var("SEQUENCER_ANCHOR_CREDENTIAL").ok();

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the sequencer cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.batching.commit_threshold == 0 {
            return Err(crate::Error::Config(
                "batching.commit_threshold must be at least 1".to_string(),
            ));
        }
        if self.batching.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "batching.mailbox_capacity must be at least 1".to_string(),
            ));
        }
        if !self.accounts.open_enrollment && self.accounts.participants.is_empty() {
            return Err(crate::Error::Config(
                "closed enrollment requires at least one participant".to_string(),
            ));
        }
        Ok(())
    }
}
