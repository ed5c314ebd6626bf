//! In-memory vault used by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, LogData, TxHash, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolInterface, SolValue};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use vault_sync::config::VaultSyncConfig;
use vault_sync::contract::IDeFiAgentVault::{self, IDeFiAgentVaultCalls};
use vault_sync::errors::ClientError;
use vault_sync::gateway::{ChainClient, LogStream, RawLog, TxReceipt, WriteRequest};
use vault_sync::notify::{BroadcastSink, Notification};
use vault_sync::VaultSession;

pub const CHAIN_ID: u64 = 84_532;
pub const APY_BPS: u64 = 1_250;
/// Fee retained by the simulated vault on harvested yield, in basis points.
pub const FEE_BPS: u64 = 1_000;

pub fn owner() -> Address {
    Address::repeat_byte(0x0a)
}

pub fn user() -> Address {
    Address::repeat_byte(0x0b)
}

pub fn agent() -> Address {
    Address::repeat_byte(0x0c)
}

pub fn token() -> Address {
    Address::repeat_byte(0x0d)
}

pub fn contract() -> Address {
    Address::repeat_byte(0xee)
}

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(1_000_000_000_000_000_000u128)
}

/// Configuration pointing at the mock vault with a single tracked token.
pub fn test_config() -> VaultSyncConfig {
    let mut config = VaultSyncConfig::default();
    config.chain.contract_address = contract().to_string();
    config.sync.settle_delay_ms = 10;
    config.sync.stable_poll_interval_ms = 10;
    config.sync.tracked_tokens = vec![token().to_string()];
    config
}

#[derive(Default)]
struct VaultLedger {
    owner: Address,
    agents: HashSet<Address>,
    eth_deposits: HashMap<Address, U256>,
    token_deposits: HashMap<(Address, Address), U256>,
    total_deposited: U256,
    total_yield: U256,
    total_fees: U256,
}

#[derive(Default)]
struct Controls {
    failing_reads: HashSet<[u8; 4]>,
    reject_next_write: bool,
    read_delay: Duration,
    receipt_delay: Duration,
    /// Stale `totalDeposited` answer and how many reads still get it.
    lagging_total: Option<(U256, usize)>,
}

/// Simulated vault deployment implementing [`ChainClient`].
pub struct MockChain {
    account: Mutex<Option<Address>>,
    ledger: Mutex<VaultLedger>,
    controls: Mutex<Controls>,
    receipts: Mutex<HashMap<TxHash, TxReceipt>>,
    subscribers: Mutex<HashMap<B256, Vec<mpsc::UnboundedSender<Result<RawLog, ClientError>>>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    nonce: AtomicU64,
    block: AtomicU64,
}

impl MockChain {
    pub fn new(account: Option<Address>) -> Arc<Self> {
        Arc::new(Self {
            account: Mutex::new(account),
            ledger: Mutex::new(VaultLedger {
                owner: owner(),
                ..VaultLedger::default()
            }),
            controls: Mutex::new(Controls::default()),
            receipts: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            nonce: AtomicU64::new(1),
            block: AtomicU64::new(100),
        })
    }

    pub fn set_account(&self, account: Option<Address>) {
        *self.account.lock() = account;
    }

    pub fn add_agent(&self, agent: Address) {
        self.ledger.lock().agents.insert(agent);
    }

    /// Credits a deposit without going through a transaction.
    pub fn seed_deposit(&self, user: Address, amount: U256) {
        let mut ledger = self.ledger.lock();
        *ledger.eth_deposits.entry(user).or_default() += amount;
        ledger.total_deposited += amount;
    }

    pub fn total_deposited(&self) -> U256 {
        self.ledger.lock().total_deposited
    }

    /// Makes every read of `C` fail with a transport error.
    pub fn fail_reads<C: SolCall>(&self) {
        self.controls.lock().failing_reads.insert(C::SELECTOR);
    }

    pub fn restore_reads(&self) {
        self.controls.lock().failing_reads.clear();
    }

    pub fn reject_next_write(&self) {
        self.controls.lock().reject_next_write = true;
    }

    /// Values are captured when the read arrives; the response is held back by `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        self.controls.lock().read_delay = delay;
    }

    pub fn set_receipt_delay(&self, delay: Duration) {
        self.controls.lock().receipt_delay = delay;
    }

    /// Serves the current `totalDeposited` to the next `reads` reads of it,
    /// like an RPC node that has not indexed the latest block yet.
    pub fn lag_total_deposited(&self, reads: usize) {
        let total = self.total_deposited();
        self.controls.lock().lagging_total = Some((total, reads));
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .values()
            .map(|senders| senders.iter().filter(|sender| !sender.is_closed()).count())
            .sum()
    }

    /// A deposit made by some other wallet, observed only through its event.
    pub fn emit_external_deposit(&self, depositor: Address, amount: U256) {
        self.seed_deposit(depositor, amount);
        self.emit(IDeFiAgentVault::Deposited {
            user: depositor,
            token: Address::ZERO,
            amount,
        });
    }

    pub fn emit<E: SolEvent>(&self, event: E) {
        self.emit_log(event.encode_log_data());
    }

    /// Delivers the same log twice, as a reconnecting provider might.
    pub fn emit_duplicate<E: SolEvent>(&self, event: E) {
        let data = event.encode_log_data();
        self.emit_log(data.clone());
        self.emit_log(data);
    }

    pub fn emit_stream_error(&self, signature: B256) {
        self.push(signature, Err(ClientError::Transport("connection reset".into())));
    }

    /// Terminates every open subscription stream.
    pub fn close_streams(&self) {
        self.subscribers.lock().clear();
    }

    fn emit_log(&self, data: LogData) {
        let Some(signature) = data.topics().first().copied() else {
            return;
        };
        let log = RawLog {
            address: contract(),
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            block_number: Some(self.block.fetch_add(1, Ordering::SeqCst)),
            transaction_hash: None,
        };
        self.push(signature, Ok(log));
    }

    fn push(&self, signature: B256, item: Result<RawLog, ClientError>) {
        if let Some(senders) = self.subscribers.lock().get_mut(&signature) {
            senders.retain(|sender| sender.unbounded_send(item.clone()).is_ok());
        }
    }

    fn answer(&self, call: IDeFiAgentVaultCalls) -> Result<Vec<u8>, ClientError> {
        let ledger = self.ledger.lock();
        let encoded = match call {
            IDeFiAgentVaultCalls::totalDeposited(_) => ledger.total_deposited.abi_encode(),
            IDeFiAgentVaultCalls::totalYieldHarvested(_) => ledger.total_yield.abi_encode(),
            IDeFiAgentVaultCalls::totalFeesCollected(_) => ledger.total_fees.abi_encode(),
            IDeFiAgentVaultCalls::estimatedAPY(_) => U256::from(APY_BPS).abi_encode(),
            IDeFiAgentVaultCalls::owner(_) => ledger.owner.abi_encode(),
            IDeFiAgentVaultCalls::isAgent(call) => ledger.agents.contains(&call.account).abi_encode(),
            IDeFiAgentVaultCalls::userDepositETH(call) => ledger
                .eth_deposits
                .get(&call.user)
                .copied()
                .unwrap_or_default()
                .abi_encode(),
            IDeFiAgentVaultCalls::userDepositERC20(call) => ledger
                .token_deposits
                .get(&(call.user, call.token))
                .copied()
                .unwrap_or_default()
                .abi_encode(),
            _ => return Err(ClientError::Reverted("not a view function".into())),
        };
        Ok(encoded)
    }

    /// Applies a write; returns `false` when the simulated contract reverts.
    fn execute(&self, from: Address, value: U256, call: IDeFiAgentVaultCalls) -> bool {
        let mut ledger = self.ledger.lock();
        let is_owner = from == ledger.owner;
        let is_agent = ledger.agents.contains(&from);
        match call {
            IDeFiAgentVaultCalls::depositETH(_) => {
                if value.is_zero() {
                    return false;
                }
                *ledger.eth_deposits.entry(from).or_default() += value;
                ledger.total_deposited += value;
                drop(ledger);
                self.emit(IDeFiAgentVault::Deposited {
                    user: from,
                    token: Address::ZERO,
                    amount: value,
                });
            }
            IDeFiAgentVaultCalls::depositERC20(call) => {
                if call.amount.is_zero() {
                    return false;
                }
                *ledger.token_deposits.entry((from, call.token)).or_default() += call.amount;
                drop(ledger);
                self.emit(IDeFiAgentVault::Deposited {
                    user: from,
                    token: call.token,
                    amount: call.amount,
                });
            }
            IDeFiAgentVaultCalls::withdrawETH(call) => {
                if !is_owner || call.amount > ledger.total_deposited {
                    return false;
                }
                ledger.total_deposited -= call.amount;
                let balance = ledger.eth_deposits.entry(from).or_default();
                *balance = balance.saturating_sub(call.amount);
            }
            IDeFiAgentVaultCalls::grantAgent(call) => {
                if !is_owner {
                    return false;
                }
                ledger.agents.insert(call.agent);
                drop(ledger);
                self.emit(IDeFiAgentVault::AgentGranted { agent: call.agent });
            }
            IDeFiAgentVaultCalls::revokeAgent(call) => {
                if !is_owner {
                    return false;
                }
                ledger.agents.remove(&call.agent);
                drop(ledger);
                self.emit(IDeFiAgentVault::AgentRevoked { agent: call.agent });
            }
            IDeFiAgentVaultCalls::agentHarvest(call) => {
                if !is_agent {
                    return false;
                }
                let fee = call.yieldAmount * U256::from(FEE_BPS) / U256::from(10_000u64);
                ledger.total_yield += call.yieldAmount;
                ledger.total_fees += fee;
                drop(ledger);
                self.emit(IDeFiAgentVault::YieldHarvested {
                    agent: from,
                    yieldAmount: call.yieldAmount,
                    fee,
                });
            }
            IDeFiAgentVaultCalls::agentRebalance(_) => {
                if !is_agent {
                    return false;
                }
            }
            _ => return false,
        }
        true
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn read(&self, contract_address: Address, calldata: Bytes) -> Result<Bytes, ClientError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if contract_address != contract() {
            return Err(ClientError::Transport("unknown contract".into()));
        }
        let (failing, lagged, delay) = {
            let mut controls = self.controls.lock();
            let selector: [u8; 4] = calldata
                .get(..4)
                .and_then(|bytes| bytes.try_into().ok())
                .unwrap_or_default();
            let lagged = match controls.lagging_total.as_mut() {
                Some((total, remaining))
                    if *remaining > 0 && selector == IDeFiAgentVault::totalDepositedCall::SELECTOR =>
                {
                    *remaining -= 1;
                    Some(*total)
                }
                _ => None,
            };
            (controls.failing_reads.contains(&selector), lagged, controls.read_delay)
        };
        let call = IDeFiAgentVaultCalls::abi_decode(&calldata, true).map_err(ClientError::decode);
        let answer = if failing {
            Err(ClientError::Transport("read timed out".into()))
        } else if let Some(total) = lagged {
            Ok(total.abi_encode())
        } else {
            call.and_then(|call| self.answer(call))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer.map(Bytes::from)
    }

    async fn write(&self, request: WriteRequest) -> Result<TxHash, ClientError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if std::mem::take(&mut self.controls.lock().reject_next_write) {
            return Err(ClientError::Rejected("User rejected the request.".into()));
        }
        if request.to != contract() {
            return Err(ClientError::Transport("unknown contract".into()));
        }
        let call = IDeFiAgentVaultCalls::abi_decode(&request.calldata, true)
            .map_err(ClientError::decode)?;
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let hash = keccak256(nonce.to_be_bytes());
        let success = self.execute(request.from, request.value, call);
        let receipt = TxReceipt {
            hash,
            block_number: Some(self.block.fetch_add(1, Ordering::SeqCst)),
            success,
        };
        self.receipts.lock().insert(hash, receipt);
        Ok(hash)
    }

    async fn await_receipt(&self, hash: TxHash) -> Result<TxReceipt, ClientError> {
        let delay = self.controls.lock().receipt_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.receipts
            .lock()
            .get(&hash)
            .copied()
            .ok_or_else(|| ClientError::Transport(format!("unknown transaction {hash}")))
    }

    async fn subscribe(&self, contract_address: Address, event: B256) -> Result<LogStream, ClientError> {
        if contract_address != contract() {
            return Err(ClientError::Transport("unknown contract".into()));
        }
        let (sender, receiver) = mpsc::unbounded();
        self.subscribers.lock().entry(event).or_default().push(sender);
        Ok(receiver.boxed())
    }

    fn current_address(&self) -> Option<Address> {
        *self.account.lock()
    }

    fn current_chain(&self) -> u64 {
        CHAIN_ID
    }
}

/// Session over a fresh mock vault with `account` connected, plus its notification stream.
pub fn session_with(
    account: Option<Address>,
    config: VaultSyncConfig,
) -> (Arc<MockChain>, VaultSession, broadcast::Receiver<Notification>) {
    let chain = MockChain::new(account);
    let session = VaultSession::new(chain.clone(), &config).expect("session");
    let (sink, notifications) = BroadcastSink::new(64);
    session.notifier().attach(sink);
    (chain, session, notifications)
}

pub async fn next_notification(receiver: &mut broadcast::Receiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("notification in time")
        .expect("notification stream open")
}

/// Polls `condition` until it holds, panicking after roughly half a second.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..20 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met in time");
}

/// Async variant of [`wait_until`].
pub async fn wait_until_async<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..20 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met in time");
}
