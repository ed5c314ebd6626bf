//! Snapshots and transaction records shared across the sync layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

use crate::errors::{MutationFailure, ValidationError};

/// Explicit wallet and chain context handed to every operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainContext {
    pub account: Option<Address>,
    pub chain_id: u64,
}

impl ChainContext {
    pub fn new(account: Option<Address>, chain_id: u64) -> Self {
        Self { account, chain_id }
    }
}

/// Global vault metrics that make up a [`VaultState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultField {
    TotalDeposited,
    TotalYieldHarvested,
    TotalFeesCollected,
    EstimatedApy,
    Owner,
}

impl fmt::Display for VaultField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VaultField::TotalDeposited => "total_deposited",
            VaultField::TotalYieldHarvested => "total_yield_harvested",
            VaultField::TotalFeesCollected => "total_fees_collected",
            VaultField::EstimatedApy => "estimated_apy",
            VaultField::Owner => "owner",
        };
        f.write_str(label)
    }
}

/// Snapshot of the global vault metrics.
///
/// `None` means the field has never been read successfully. Fields listed in
/// `stale` failed on the most recent refresh and still carry the value from
/// an earlier read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultState {
    pub total_deposited: Option<U256>,
    pub total_yield_harvested: Option<U256>,
    pub total_fees_collected: Option<U256>,
    /// Annual yield estimate in basis points.
    pub estimated_apy_bps: Option<U256>,
    pub owner: Option<Address>,
    pub stale: Vec<VaultField>,
}

impl VaultState {
    pub fn estimated_apy_percent(&self) -> f64 {
        self.estimated_apy_bps
            .map(|bps| u64::try_from(bps).map(|bps| bps as f64 / 100.0).unwrap_or(f64::MAX))
            .unwrap_or(0.0)
    }

    pub fn is_stale(&self, field: VaultField) -> bool {
        self.stale.contains(&field)
    }

    /// Compares the metric values, ignoring staleness bookkeeping.
    pub fn same_values(&self, other: &VaultState) -> bool {
        self.total_deposited == other.total_deposited
            && self.total_yield_harvested == other.total_yield_harvested
            && self.total_fees_collected == other.total_fees_collected
            && self.estimated_apy_bps == other.estimated_apy_bps
            && self.owner == other.owner
    }

    /// Whether `account` is the on-chain owner. Advisory only.
    pub fn is_owner(&self, account: Option<Address>) -> bool {
        matches!((self.owner, account), (Some(owner), Some(account)) if owner == account)
    }
}

/// Deposits held by the connected account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPosition {
    pub account: Option<Address>,
    pub eth_deposit: Option<U256>,
    pub token_deposits: BTreeMap<Address, Option<U256>>,
    pub stale: bool,
}

impl UserPosition {
    /// Position used while no wallet is connected.
    pub fn empty() -> Self {
        Self {
            account: None,
            eth_deposit: None,
            token_deposits: BTreeMap::new(),
            stale: false,
        }
    }

    pub fn for_account(account: Address) -> Self {
        Self {
            account: Some(account),
            ..Self::empty()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }
}

impl Default for UserPosition {
    fn default() -> Self {
        Self::empty()
    }
}

/// Mutating operations exposed by the vault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    DepositEth,
    DepositErc20,
    Withdraw,
    GrantAgent,
    RevokeAgent,
    Harvest,
    Rebalance,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::DepositEth => "deposit-eth",
            MutationKind::DepositErc20 => "deposit-erc20",
            MutationKind::Withdraw => "withdraw",
            MutationKind::GrantAgent => "grant-agent",
            MutationKind::RevokeAgent => "revoke-agent",
            MutationKind::Harvest => "harvest",
            MutationKind::Rebalance => "rebalance",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated arguments recorded on a [`PendingTransaction`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmittedArgs {
    Amount(U256),
    TokenAmount { token: Address, amount: U256 },
    Agent(Address),
    None,
}

impl fmt::Display for SubmittedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmittedArgs::Amount(amount) => write!(f, "{} ETH", display_ether(*amount)),
            SubmittedArgs::TokenAmount { token, amount } => {
                write!(f, "{amount} units of {}", short_address(token))
            }
            SubmittedArgs::Agent(agent) => f.write_str(&short_address(agent)),
            SubmittedArgs::None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// One submitted write and its lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingTransaction {
    pub id: u64,
    pub kind: MutationKind,
    pub args: SubmittedArgs,
    pub status: TxStatus,
    pub created_at: SystemTime,
    pub hash: Option<TxHash>,
    pub failure: Option<MutationFailure>,
}

impl PendingTransaction {
    pub fn new(id: u64, kind: MutationKind, args: SubmittedArgs) -> Self {
        Self {
            id,
            kind,
            args,
            status: TxStatus::Pending,
            created_at: SystemTime::now(),
            hash: None,
            failure: None,
        }
    }

    /// Moves a pending transaction to `Confirmed`. Terminal records are left untouched.
    pub fn confirm(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TxStatus::Confirmed;
        true
    }

    /// Moves a pending transaction to `Failed`. Terminal records are left untouched.
    pub fn fail(&mut self, failure: MutationFailure) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TxStatus::Failed;
        self.failure = Some(failure);
        true
    }
}

const ETHER_DECIMALS: usize = 18;

/// Parses a decimal ether amount (`"1.5"`) into wei.
///
/// Only plain digits with an optional fractional part of at most 18 digits are
/// accepted; anything that cannot be represented exactly in wei is malformed.
pub fn parse_eth_amount(input: &str) -> Result<U256, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyAmount);
    }
    if trimmed.starts_with('-') {
        return Err(ValidationError::NonPositiveAmount);
    }
    let malformed = || ValidationError::MalformedAmount(trimmed.to_owned());
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if (whole.is_empty() && fraction.is_empty())
        || !is_digits(whole)
        || !is_digits(fraction)
        || fraction.len() > ETHER_DECIMALS
    {
        return Err(malformed());
    }

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(whole, 10).map_err(|_| malformed())?
    };
    let fraction = U256::from_str_radix(&format!("{fraction:0<width$}", width = ETHER_DECIMALS), 10)
        .map_err(|_| malformed())?;
    let amount = whole
        .checked_mul(U256::from(10u64).pow(U256::from(ETHER_DECIMALS)))
        .and_then(|wei| wei.checked_add(fraction))
        .ok_or_else(malformed)?;
    ensure_positive(amount)
}

/// Parses an integer amount expressed in token base units.
pub fn parse_token_amount(input: &str) -> Result<U256, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyAmount);
    }
    if trimmed.starts_with('-') {
        return Err(ValidationError::NonPositiveAmount);
    }
    let malformed = || ValidationError::MalformedAmount(trimmed.to_owned());
    if !is_digits(trimmed) {
        return Err(malformed());
    }
    let amount = U256::from_str_radix(trimmed, 10).map_err(|_| malformed())?;
    ensure_positive(amount)
}

fn is_digits(value: &str) -> bool {
    value.bytes().all(|byte| byte.is_ascii_digit())
}

fn ensure_positive(amount: U256) -> Result<U256, ValidationError> {
    if amount.is_zero() {
        Err(ValidationError::NonPositiveAmount)
    } else {
        Ok(amount)
    }
}

/// Parses a `0x`-prefixed, 20-byte hex address.
pub fn parse_address(input: &str) -> Result<Address, ValidationError> {
    let trimmed = input.trim();
    let malformed = || ValidationError::MalformedAddress(trimmed.to_owned());
    if trimmed.len() != 42 || !(trimmed.starts_with("0x") || trimmed.starts_with("0X")) {
        return Err(malformed());
    }
    Address::from_str(trimmed).map_err(|_| malformed())
}

/// Renders wei as ether without trailing zeros (`1.5`, `2`).
pub fn display_ether(amount: U256) -> String {
    let formatted = format_ether(amount);
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => formatted,
    }
}

/// Renders `0x1234...abcd`.
pub fn short_address(address: &Address) -> String {
    let full = format!("0x{}", hex::encode(address.as_slice()));
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}
