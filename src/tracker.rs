//! Lifecycle tracking for vault writes.
//!
//! Every command funnels through [`TransactionTracker::execute_mutation`]:
//! validate locally, submit, wait for the terminal outcome, notify, then let
//! the cache catch up with the chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::cache::VaultStateCache;
use crate::config::RefreshStrategy;
use crate::errors::ValidationError;
use crate::gateway::{RemoteCallGateway, VaultCall};
use crate::notify::{Notification, NotificationDispatcher};
use crate::types::{
    display_ether, parse_address, parse_eth_amount, parse_token_amount, short_address,
    ChainContext, MutationKind, PendingTransaction, SubmittedArgs, VaultState,
};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Raw user intent, validated before anything reaches the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationIntent {
    DepositEth { amount: String },
    DepositErc20 { token: String, amount: String },
    WithdrawEth { amount: String },
    GrantAgent { agent: String },
    RevokeAgent { agent: String },
    AgentHarvest { yield_amount: String },
    AgentRebalance,
}

/// Intent that passed local validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedMutation {
    pub from: Address,
    pub kind: MutationKind,
    pub call: VaultCall,
    pub value: U256,
    pub args: SubmittedArgs,
}

impl MutationIntent {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationIntent::DepositEth { .. } => MutationKind::DepositEth,
            MutationIntent::DepositErc20 { .. } => MutationKind::DepositErc20,
            MutationIntent::WithdrawEth { .. } => MutationKind::Withdraw,
            MutationIntent::GrantAgent { .. } => MutationKind::GrantAgent,
            MutationIntent::RevokeAgent { .. } => MutationKind::RevokeAgent,
            MutationIntent::AgentHarvest { .. } => MutationKind::Harvest,
            MutationIntent::AgentRebalance => MutationKind::Rebalance,
        }
    }

    /// Checks amounts and addresses. Authorization is left to the contract.
    pub fn validate(&self, ctx: &ChainContext) -> Result<ValidatedMutation, ValidationError> {
        let (call, value, args) = match self {
            MutationIntent::DepositEth { amount } => {
                let amount = parse_eth_amount(amount)?;
                (VaultCall::DepositEth, amount, SubmittedArgs::Amount(amount))
            }
            MutationIntent::DepositErc20 { token, amount } => {
                let token = parse_address(token)?;
                let amount = parse_token_amount(amount)?;
                (
                    VaultCall::DepositErc20 { token, amount },
                    U256::ZERO,
                    SubmittedArgs::TokenAmount { token, amount },
                )
            }
            MutationIntent::WithdrawEth { amount } => {
                let amount = parse_eth_amount(amount)?;
                (
                    VaultCall::WithdrawEth { amount },
                    U256::ZERO,
                    SubmittedArgs::Amount(amount),
                )
            }
            MutationIntent::GrantAgent { agent } => {
                let agent = parse_address(agent)?;
                (
                    VaultCall::GrantAgent { agent },
                    U256::ZERO,
                    SubmittedArgs::Agent(agent),
                )
            }
            MutationIntent::RevokeAgent { agent } => {
                let agent = parse_address(agent)?;
                (
                    VaultCall::RevokeAgent { agent },
                    U256::ZERO,
                    SubmittedArgs::Agent(agent),
                )
            }
            MutationIntent::AgentHarvest { yield_amount } => {
                let yield_amount = parse_eth_amount(yield_amount)?;
                (
                    VaultCall::AgentHarvest { yield_amount },
                    U256::ZERO,
                    SubmittedArgs::Amount(yield_amount),
                )
            }
            MutationIntent::AgentRebalance => {
                (VaultCall::AgentRebalance, U256::ZERO, SubmittedArgs::None)
            }
        };
        let from = ctx.account.ok_or(ValidationError::WalletDisconnected)?;
        Ok(ValidatedMutation {
            from,
            kind: self.kind(),
            call,
            value,
            args,
        })
    }
}

/// Caller-side view of one tracked write.
#[derive(Debug)]
pub struct TrackedTransaction {
    updates: watch::Receiver<PendingTransaction>,
}

impl TrackedTransaction {
    pub fn current(&self) -> PendingTransaction {
        self.updates.borrow().clone()
    }

    pub fn id(&self) -> u64 {
        self.updates.borrow().id
    }

    pub fn updates(&self) -> watch::Receiver<PendingTransaction> {
        self.updates.clone()
    }

    /// Resolves once the transaction is confirmed or failed.
    pub async fn wait(mut self) -> PendingTransaction {
        loop {
            let current = self.updates.borrow_and_update().clone();
            if current.status.is_terminal() {
                return current;
            }
            if self.updates.changed().await.is_err() {
                return self.updates.borrow().clone();
            }
        }
    }
}

struct TrackerInner {
    gateway: RemoteCallGateway,
    cache: Arc<VaultStateCache>,
    notifier: NotificationDispatcher,
    strategy: RefreshStrategy,
    lifecycle: broadcast::Sender<PendingTransaction>,
    context: watch::Receiver<ChainContext>,
}

/// Submits writes and reports their pending→terminal lifecycle.
#[derive(Clone)]
pub struct TransactionTracker {
    inner: Arc<TrackerInner>,
    next_id: Arc<AtomicU64>,
}

impl TransactionTracker {
    pub fn new(
        gateway: RemoteCallGateway,
        cache: Arc<VaultStateCache>,
        notifier: NotificationDispatcher,
        strategy: RefreshStrategy,
        context: watch::Receiver<ChainContext>,
    ) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(TrackerInner {
                gateway,
                cache,
                notifier,
                strategy,
                lifecycle,
                context,
            }),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Every lifecycle transition of every tracked write.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingTransaction> {
        self.inner.lifecycle.subscribe()
    }

    /// Validates `intent` synchronously and, when valid, tracks its submission
    /// on a background task.
    pub fn execute_mutation(
        &self,
        ctx: &ChainContext,
        intent: MutationIntent,
    ) -> Result<TrackedTransaction, ValidationError> {
        let mutation = intent.validate(ctx).map_err(|error| {
            debug!(kind = %intent.kind(), %error, "mutation rejected locally");
            error
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingTransaction::new(id, mutation.kind, mutation.args.clone());
        let (updates_tx, updates_rx) = watch::channel(pending.clone());
        let _ = self.inner.lifecycle.send(pending.clone());
        info!(tx_id = id, kind = %mutation.kind, args = %mutation.args, "tracking vault write");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.drive(mutation, pending, updates_tx).await;
        });

        Ok(TrackedTransaction {
            updates: updates_rx,
        })
    }

    pub fn deposit_eth(
        &self,
        ctx: &ChainContext,
        amount: &str,
    ) -> Result<TrackedTransaction, ValidationError> {
        self.execute_mutation(
            ctx,
            MutationIntent::DepositEth {
                amount: amount.to_owned(),
            },
        )
    }

    pub fn deposit_erc20(
        &self,
        ctx: &ChainContext,
        token: &str,
        amount: &str,
    ) -> Result<TrackedTransaction, ValidationError> {
        self.execute_mutation(
            ctx,
            MutationIntent::DepositErc20 {
                token: token.to_owned(),
                amount: amount.to_owned(),
            },
        )
    }

    pub fn withdraw_eth(
        &self,
        ctx: &ChainContext,
        amount: &str,
    ) -> Result<TrackedTransaction, ValidationError> {
        self.execute_mutation(
            ctx,
            MutationIntent::WithdrawEth {
                amount: amount.to_owned(),
            },
        )
    }

    pub fn grant_agent(
        &self,
        ctx: &ChainContext,
        agent: &str,
    ) -> Result<TrackedTransaction, ValidationError> {
        self.execute_mutation(
            ctx,
            MutationIntent::GrantAgent {
                agent: agent.to_owned(),
            },
        )
    }

    pub fn revoke_agent(
        &self,
        ctx: &ChainContext,
        agent: &str,
    ) -> Result<TrackedTransaction, ValidationError> {
        self.execute_mutation(
            ctx,
            MutationIntent::RevokeAgent {
                agent: agent.to_owned(),
            },
        )
    }

    pub fn agent_harvest(
        &self,
        ctx: &ChainContext,
        yield_amount: &str,
    ) -> Result<TrackedTransaction, ValidationError> {
        self.execute_mutation(
            ctx,
            MutationIntent::AgentHarvest {
                yield_amount: yield_amount.to_owned(),
            },
        )
    }

    pub fn agent_rebalance(&self, ctx: &ChainContext) -> Result<TrackedTransaction, ValidationError> {
        self.execute_mutation(ctx, MutationIntent::AgentRebalance)
    }
}

impl TrackerInner {
    async fn drive(
        &self,
        mutation: ValidatedMutation,
        mut tx: PendingTransaction,
        updates: watch::Sender<PendingTransaction>,
    ) {
        let baseline = self.cache.vault_state();
        let outcome = match self
            .gateway
            .submit(mutation.from, &mutation.call, mutation.value)
            .await
        {
            Ok(handle) => {
                tx.hash = Some(handle.hash());
                debug!(tx_id = tx.id, hash = %handle.hash(), "vault write broadcast");
                self.publish(&tx, &updates);
                handle.resolve().await
            }
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(receipt) => {
                tx.confirm();
                info!(
                    tx_id = tx.id,
                    kind = %tx.kind,
                    hash = %receipt.hash,
                    block = ?receipt.block_number,
                    "vault write confirmed"
                );
                if let SubmittedArgs::Agent(agent) = &tx.args {
                    self.cache.forget_agent_status(*agent);
                }
                // Waiters may exit as soon as the terminal state is published.
                self.notifier.dispatch(success_notification(&tx));
                self.publish(&tx, &updates);
                self.settle(&baseline).await;
            }
            Err(failure) => {
                warn!(tx_id = tx.id, kind = %tx.kind, error = %failure, "vault write failed");
                let detail = failure.user_hint(tx.kind);
                tx.fail(failure);
                self.notifier
                    .dispatch(Notification::error(failure_title(tx.kind), detail));
                self.publish(&tx, &updates);
            }
        }
    }

    fn publish(&self, tx: &PendingTransaction, updates: &watch::Sender<PendingTransaction>) {
        updates.send_replace(tx.clone());
        let _ = self.lifecycle.send(tx.clone());
    }

    /// Lets the RPC view catch up before re-reading; a heuristic, not a guarantee.
    ///
    /// `baseline` is the vault view from before the write was submitted. The
    /// position refreshed afterwards is the one of the account connected when
    /// the wait ends, which may differ from the sender.
    async fn settle(&self, baseline: &VaultState) {
        match self.strategy {
            RefreshStrategy::FixedDelay { delay } => {
                tokio::time::sleep(delay).await;
                self.cache.refresh().await;
            }
            RefreshStrategy::PollUntilStable {
                interval,
                max_attempts,
            } => {
                let mut previous: Option<VaultState> = None;
                for attempt in 1..=max_attempts {
                    tokio::time::sleep(interval).await;
                    let next = self.cache.refresh().await;
                    // A read that still matches the pre-write view has not caught up.
                    let stable = next.stale.is_empty()
                        && !next.same_values(baseline)
                        && previous.as_ref().is_some_and(|prev| prev.same_values(&next));
                    previous = Some(next);
                    if stable {
                        debug!(attempt, "vault snapshot stable after write");
                        break;
                    }
                }
            }
        }
        let account = self.context.borrow().account;
        self.cache.refresh_user(account).await;
    }
}

fn success_notification(tx: &PendingTransaction) -> Notification {
    let detail = match (&tx.kind, &tx.args) {
        (MutationKind::DepositEth, SubmittedArgs::Amount(amount)) => {
            format!("Deposited {} ETH to the vault", display_ether(*amount))
        }
        (MutationKind::DepositErc20, SubmittedArgs::TokenAmount { token, amount }) => {
            format!("Deposited {amount} units of {} to the vault", short_address(token))
        }
        (MutationKind::Withdraw, SubmittedArgs::Amount(amount)) => {
            format!("Withdrew {} ETH from the vault", display_ether(*amount))
        }
        (MutationKind::GrantAgent, SubmittedArgs::Agent(agent)) => {
            format!("{} is now an agent", short_address(agent))
        }
        (MutationKind::RevokeAgent, SubmittedArgs::Agent(agent)) => {
            format!("{} is no longer an agent", short_address(agent))
        }
        (MutationKind::Harvest, SubmittedArgs::Amount(amount)) => {
            format!("Harvested {} ETH yield", display_ether(*amount))
        }
        (MutationKind::Rebalance, _) => "Portfolio rebalancing in progress".to_string(),
        (kind, args) => format!("{kind} {args}"),
    };
    Notification::success(success_title(tx.kind), detail)
}

fn success_title(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::DepositEth => "Deposit Successful",
        MutationKind::DepositErc20 => "ERC20 Deposit Successful",
        MutationKind::Withdraw => "Withdrawal Successful",
        MutationKind::GrantAgent => "Agent Granted",
        MutationKind::RevokeAgent => "Agent Revoked",
        MutationKind::Harvest => "Yield Harvested",
        MutationKind::Rebalance => "Rebalance Initiated",
    }
}

fn failure_title(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::DepositEth | MutationKind::DepositErc20 => "Deposit Failed",
        MutationKind::Withdraw => "Withdrawal Failed",
        MutationKind::GrantAgent => "Grant Failed",
        MutationKind::RevokeAgent => "Revoke Failed",
        MutationKind::Harvest => "Harvest Failed",
        MutationKind::Rebalance => "Rebalance Failed",
    }
}
