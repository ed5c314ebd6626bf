//! Latest known vault metrics and the connected account's position.
//!
//! Snapshots are rebuilt wholesale from fresh reads. A field whose read
//! fails keeps the value from the previous snapshot and is flagged stale;
//! nothing is ever derived by applying a delta locally.

use std::collections::{BTreeMap, HashMap};

use alloy::primitives::Address;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::ReadError;
use crate::gateway::RemoteCallGateway;
use crate::types::{UserPosition, VaultField, VaultState};

/// Published view of the cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultSnapshot {
    pub vault: VaultState,
    pub user: UserPosition,
    /// Bumped on every committed refresh.
    pub version: u64,
}

#[derive(Default)]
struct CacheState {
    snapshot: VaultSnapshot,
    vault_started: u64,
    vault_committed: u64,
    user_started: u64,
    user_committed: u64,
}

pub struct VaultStateCache {
    gateway: RemoteCallGateway,
    tracked_tokens: Vec<Address>,
    state: Mutex<CacheState>,
    agents: Mutex<HashMap<Address, bool>>,
    updates: watch::Sender<VaultSnapshot>,
}

impl VaultStateCache {
    pub fn new(gateway: RemoteCallGateway, tracked_tokens: Vec<Address>) -> Self {
        let (updates, _) = watch::channel(VaultSnapshot::default());
        Self {
            gateway,
            tracked_tokens,
            state: Mutex::new(CacheState::default()),
            agents: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// Observers are notified after every committed refresh.
    pub fn subscribe(&self) -> watch::Receiver<VaultSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> VaultSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn vault_state(&self) -> VaultState {
        self.state.lock().snapshot.vault.clone()
    }

    pub fn user_position(&self) -> UserPosition {
        self.state.lock().snapshot.user.clone()
    }

    pub fn tracked_tokens(&self) -> &[Address] {
        &self.tracked_tokens
    }

    /// Re-reads all global metrics and replaces the vault snapshot.
    pub async fn refresh(&self) -> VaultState {
        let ticket = {
            let mut state = self.state.lock();
            state.vault_started += 1;
            state.vault_started
        };

        let (deposited, harvested, fees, apy, owner) = tokio::join!(
            self.gateway.total_deposited(),
            self.gateway.total_yield_harvested(),
            self.gateway.total_fees_collected(),
            self.gateway.estimated_apy(),
            self.gateway.owner(),
        );

        let mut state = self.state.lock();
        if ticket < state.vault_committed {
            debug!(ticket, committed = state.vault_committed, "discarding superseded vault refresh");
            return state.snapshot.vault.clone();
        }

        let previous = &state.snapshot.vault;
        let mut stale = Vec::new();
        let next = VaultState {
            total_deposited: merge(
                VaultField::TotalDeposited,
                deposited,
                previous.total_deposited,
                &mut stale,
            ),
            total_yield_harvested: merge(
                VaultField::TotalYieldHarvested,
                harvested,
                previous.total_yield_harvested,
                &mut stale,
            ),
            total_fees_collected: merge(
                VaultField::TotalFeesCollected,
                fees,
                previous.total_fees_collected,
                &mut stale,
            ),
            estimated_apy_bps: merge(
                VaultField::EstimatedApy,
                apy,
                previous.estimated_apy_bps,
                &mut stale,
            ),
            owner: merge(VaultField::Owner, owner, previous.owner, &mut stale),
            stale,
        };

        state.vault_committed = ticket;
        state.snapshot.vault = next.clone();
        self.publish(&mut state);
        next
    }

    /// Re-reads the position of `account`. `None` clears the position.
    pub async fn refresh_user(&self, account: Option<Address>) -> UserPosition {
        let Some(account) = account else {
            self.on_account_changed(None);
            return UserPosition::empty();
        };

        let ticket = {
            let mut state = self.state.lock();
            if state.snapshot.user.account != Some(account) {
                state.snapshot.user = UserPosition::for_account(account);
                self.publish(&mut state);
            }
            state.user_started += 1;
            state.user_started
        };

        let eth = self.gateway.user_deposit_eth(account).await;
        let tokens = futures::future::join_all(
            self.tracked_tokens
                .iter()
                .map(|token| self.gateway.user_deposit_erc20(account, *token)),
        )
        .await;

        let mut state = self.state.lock();
        // The account changed or a newer refresh already landed while we were reading.
        if state.snapshot.user.account != Some(account) || ticket < state.user_committed {
            return state.snapshot.user.clone();
        }

        let previous = &state.snapshot.user;
        let mut stale = false;
        let eth_deposit = match eth {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%error, %account, "user deposit read failed; keeping previous value");
                stale = true;
                previous.eth_deposit
            }
        };
        let mut token_deposits = BTreeMap::new();
        for (token, result) in self.tracked_tokens.iter().zip(tokens) {
            let value = match result {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(%error, %account, %token, "token deposit read failed; keeping previous value");
                    stale = true;
                    previous.token_deposits.get(token).copied().flatten()
                }
            };
            token_deposits.insert(*token, value);
        }

        let next = UserPosition {
            account: Some(account),
            eth_deposit,
            token_deposits,
            stale,
        };
        state.user_committed = ticket;
        state.snapshot.user = next.clone();
        self.publish(&mut state);
        next
    }

    /// Drops the position when the connected account changes or disconnects.
    pub fn on_account_changed(&self, account: Option<Address>) {
        let mut state = self.state.lock();
        if state.snapshot.user.account == account {
            return;
        }
        state.snapshot.user = account
            .map(UserPosition::for_account)
            .unwrap_or_else(UserPosition::empty);
        self.publish(&mut state);
    }

    /// Agent status of an arbitrary address, memoized per address.
    pub async fn get_agent_status(&self, account: Address) -> Result<bool, ReadError> {
        let cached = self.agents.lock().get(&account).copied();
        if let Some(status) = cached {
            return Ok(status);
        }
        let status = self.gateway.is_agent(account).await?;
        self.agents.lock().insert(account, status);
        Ok(status)
    }

    /// Evicts one memoized agent status so the next lookup reads the chain.
    pub fn forget_agent_status(&self, account: Address) {
        self.agents.lock().remove(&account);
    }

    fn publish(&self, state: &mut CacheState) {
        state.snapshot.version += 1;
        self.updates.send_replace(state.snapshot.clone());
    }
}

fn merge<T: Copy>(
    field: VaultField,
    fresh: Result<T, ReadError>,
    previous: Option<T>,
    stale: &mut Vec<VaultField>,
) -> Option<T> {
    match fresh {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(%field, %error, "vault read failed; keeping previous value");
            stale.push(field);
            previous
        }
    }
}
