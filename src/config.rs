use std::fs;
use std::path::Path;
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::contract::{BASE_SEPOLIA_CHAIN_ID, DEFAULT_CONTRACT_ADDRESS};
use crate::errors::{ConfigError, ConfigResult};
use crate::gateway::rpc::PollingConfig;
use crate::types::parse_address;

const DEFAULT_RPC_ENDPOINT: &str = "https://sepolia.base.org";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;
const DEFAULT_STABLE_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_STABLE_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_EVENT_POLL_INTERVAL_MS: u64 = 4_000;
const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 120_000;
const MIN_POLL_INTERVAL_MS: u64 = 100;
const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;

/// Top-level configuration for a vault session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VaultSyncConfig {
    pub chain: ChainConfig,
    pub sync: SyncConfig,
}

impl VaultSyncConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| ConfigError::Invalid(format!("unable to parse config: {err}")))
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| ConfigError::Invalid(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    /// Rejects addresses that do not parse.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chain.contract_address()?;
        self.chain.account_address()?;
        self.sync.tracked_token_addresses()?;
        Ok(())
    }

    /// Returns a copy with intervals clamped to usable minimums.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        config.chain.request_timeout_ms = config.chain.request_timeout_ms.max(MIN_REQUEST_TIMEOUT_MS);
        let sync = &mut config.sync;
        sync.stable_poll_interval_ms = sync.stable_poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
        sync.stable_max_attempts = sync.stable_max_attempts.max(1);
        sync.event_poll_interval_ms = sync.event_poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
        sync.receipt_poll_interval_ms = sync.receipt_poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
        sync.receipt_timeout_ms = sync.receipt_timeout_ms.max(sync.receipt_poll_interval_ms);
        config
    }

    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            receipt_interval: Duration::from_millis(self.sync.receipt_poll_interval_ms),
            receipt_timeout: Duration::from_millis(self.sync.receipt_timeout_ms),
            log_interval: Duration::from_millis(self.sync.event_poll_interval_ms),
        }
    }
}

/// Chain endpoint and contract selection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint used for reads, writes and log polling.
    pub rpc_endpoint: String,
    pub chain_id: u64,
    /// Vault contract address.
    pub contract_address: String,
    /// Account used as `from` for writes. Reads work without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: DEFAULT_RPC_ENDPOINT.to_string(),
            chain_id: BASE_SEPOLIA_CHAIN_ID,
            contract_address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            account: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ChainConfig {
    pub fn contract_address(&self) -> ConfigResult<Address> {
        parse_address(&self.contract_address)
            .map_err(|err| ConfigError::Invalid(format!("chain.contract_address: {err}")))
    }

    pub fn account_address(&self) -> ConfigResult<Option<Address>> {
        self.account
            .as_deref()
            .map(|account| {
                parse_address(account)
                    .map_err(|err| ConfigError::Invalid(format!("chain.account: {err}")))
            })
            .transpose()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshStrategyKind {
    FixedDelay,
    PollUntilStable,
}

/// How the cache catches up after a confirmed write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshStrategy {
    /// Refresh once after `delay`.
    FixedDelay { delay: Duration },
    /// Refresh every `interval` until two consecutive snapshots agree.
    PollUntilStable { interval: Duration, max_attempts: u32 },
}

/// Refresh, polling and token tracking behaviour.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay before refreshing after a confirmed write.
    pub settle_delay_ms: u64,
    pub refresh_strategy: RefreshStrategyKind,
    pub stable_poll_interval_ms: u64,
    pub stable_max_attempts: u32,
    /// Interval between log polls for event subscriptions.
    pub event_poll_interval_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_timeout_ms: u64,
    /// ERC-20 tokens whose per-user deposits are tracked.
    pub tracked_tokens: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            refresh_strategy: RefreshStrategyKind::FixedDelay,
            stable_poll_interval_ms: DEFAULT_STABLE_POLL_INTERVAL_MS,
            stable_max_attempts: DEFAULT_STABLE_MAX_ATTEMPTS,
            event_poll_interval_ms: DEFAULT_EVENT_POLL_INTERVAL_MS,
            receipt_poll_interval_ms: DEFAULT_RECEIPT_POLL_INTERVAL_MS,
            receipt_timeout_ms: DEFAULT_RECEIPT_TIMEOUT_MS,
            tracked_tokens: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn refresh_strategy(&self) -> RefreshStrategy {
        match self.refresh_strategy {
            RefreshStrategyKind::FixedDelay => RefreshStrategy::FixedDelay {
                delay: Duration::from_millis(self.settle_delay_ms),
            },
            RefreshStrategyKind::PollUntilStable => RefreshStrategy::PollUntilStable {
                interval: Duration::from_millis(self.stable_poll_interval_ms),
                max_attempts: self.stable_max_attempts,
            },
        }
    }

    pub fn tracked_token_addresses(&self) -> ConfigResult<Vec<Address>> {
        self.tracked_tokens
            .iter()
            .map(|token| {
                parse_address(token)
                    .map_err(|err| ConfigError::Invalid(format!("sync.tracked_tokens: {err}")))
            })
            .collect()
    }
}
