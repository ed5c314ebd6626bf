//! Typed reads and writes against the external chain client.

pub mod rpc;

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::debug;

use crate::contract::IDeFiAgentVault;
use crate::errors::{ClientError, ExecutionError, MutationFailure, ReadError};

/// Stream of raw logs delivered by a subscription.
pub type LogStream = BoxStream<'static, Result<RawLog, ClientError>>;

/// Write submitted to the chain client. Signing is the client's concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRequest {
    pub from: Address,
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<TxHash>,
}

/// Primitives consumed from the wallet/RPC client.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn read(&self, contract: Address, calldata: Bytes) -> Result<Bytes, ClientError>;

    async fn write(&self, request: WriteRequest) -> Result<TxHash, ClientError>;

    async fn await_receipt(&self, hash: TxHash) -> Result<TxReceipt, ClientError>;

    async fn subscribe(&self, contract: Address, event: B256) -> Result<LogStream, ClientError>;

    fn current_address(&self) -> Option<Address>;

    fn current_chain(&self) -> u64;
}

/// Contract events the session listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VaultEventKind {
    Deposited,
    YieldHarvested,
    AgentGranted,
    AgentRevoked,
}

impl VaultEventKind {
    pub const ALL: [VaultEventKind; 4] = [
        VaultEventKind::Deposited,
        VaultEventKind::YieldHarvested,
        VaultEventKind::AgentGranted,
        VaultEventKind::AgentRevoked,
    ];

    pub fn signature_hash(&self) -> B256 {
        match self {
            VaultEventKind::Deposited => IDeFiAgentVault::Deposited::SIGNATURE_HASH,
            VaultEventKind::YieldHarvested => IDeFiAgentVault::YieldHarvested::SIGNATURE_HASH,
            VaultEventKind::AgentGranted => IDeFiAgentVault::AgentGranted::SIGNATURE_HASH,
            VaultEventKind::AgentRevoked => IDeFiAgentVault::AgentRevoked::SIGNATURE_HASH,
        }
    }

    /// Whether an occurrence changes balances held in the cache.
    pub fn invalidates_balances(&self) -> bool {
        matches!(
            self,
            VaultEventKind::Deposited | VaultEventKind::YieldHarvested
        )
    }
}

impl fmt::Display for VaultEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VaultEventKind::Deposited => "Deposited",
            VaultEventKind::YieldHarvested => "YieldHarvested",
            VaultEventKind::AgentGranted => "AgentGranted",
            VaultEventKind::AgentRevoked => "AgentRevoked",
        };
        f.write_str(name)
    }
}

/// State-changing vault calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultCall {
    DepositEth,
    DepositErc20 { token: Address, amount: U256 },
    WithdrawEth { amount: U256 },
    GrantAgent { agent: Address },
    RevokeAgent { agent: Address },
    AgentHarvest { yield_amount: U256 },
    AgentRebalance,
}

impl VaultCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            VaultCall::DepositEth => "depositETH",
            VaultCall::DepositErc20 { .. } => "depositERC20",
            VaultCall::WithdrawEth { .. } => "withdrawETH",
            VaultCall::GrantAgent { .. } => "grantAgent",
            VaultCall::RevokeAgent { .. } => "revokeAgent",
            VaultCall::AgentHarvest { .. } => "agentHarvest",
            VaultCall::AgentRebalance => "agentRebalance",
        }
    }

    pub fn encode(&self) -> Bytes {
        let calldata = match self {
            VaultCall::DepositEth => IDeFiAgentVault::depositETHCall {}.abi_encode(),
            VaultCall::DepositErc20 { token, amount } => IDeFiAgentVault::depositERC20Call {
                token: *token,
                amount: *amount,
            }
            .abi_encode(),
            VaultCall::WithdrawEth { amount } => {
                IDeFiAgentVault::withdrawETHCall { amount: *amount }.abi_encode()
            }
            VaultCall::GrantAgent { agent } => {
                IDeFiAgentVault::grantAgentCall { agent: *agent }.abi_encode()
            }
            VaultCall::RevokeAgent { agent } => {
                IDeFiAgentVault::revokeAgentCall { agent: *agent }.abi_encode()
            }
            VaultCall::AgentHarvest { yield_amount } => IDeFiAgentVault::agentHarvestCall {
                yieldAmount: *yield_amount,
            }
            .abi_encode(),
            VaultCall::AgentRebalance => IDeFiAgentVault::agentRebalanceCall {}.abi_encode(),
        };
        Bytes::from(calldata)
    }
}

/// Handle for a broadcast write.
pub struct TransactionHandle {
    hash: TxHash,
    client: Arc<dyn ChainClient>,
}

impl TransactionHandle {
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    /// Waits for the chain client to report the mined outcome.
    pub async fn resolve(self) -> Result<TxReceipt, MutationFailure> {
        match self.client.await_receipt(self.hash).await {
            Ok(receipt) if receipt.success => Ok(receipt),
            Ok(receipt) => Err(ExecutionError::Reverted { hash: receipt.hash }.into()),
            Err(ClientError::Reverted(_)) => {
                Err(ExecutionError::Reverted { hash: self.hash }.into())
            }
            Err(error) => Err(ExecutionError::Unconfirmed {
                hash: self.hash,
                reason: error.to_string(),
            }
            .into()),
        }
    }
}

/// Stateless typed wrapper over a [`ChainClient`] bound to one vault.
#[derive(Clone)]
pub struct RemoteCallGateway {
    client: Arc<dyn ChainClient>,
    contract: Address,
}

impl RemoteCallGateway {
    pub fn new(client: Arc<dyn ChainClient>, contract: Address) -> Self {
        Self { client, contract }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    async fn call<C: SolCall>(&self, name: &'static str, call: C) -> Result<C::Return, ReadError> {
        let calldata = Bytes::from(call.abi_encode());
        let output = self
            .client
            .read(self.contract, calldata)
            .await
            .map_err(|error| ReadError::new(name, error))?;
        C::abi_decode_returns(&output, true)
            .map_err(|error| ReadError::new(name, ClientError::decode(error)))
    }

    pub async fn total_deposited(&self) -> Result<U256, ReadError> {
        let ret = self
            .call("totalDeposited", IDeFiAgentVault::totalDepositedCall {})
            .await?;
        Ok(ret._0)
    }

    pub async fn total_yield_harvested(&self) -> Result<U256, ReadError> {
        let ret = self
            .call(
                "totalYieldHarvested",
                IDeFiAgentVault::totalYieldHarvestedCall {},
            )
            .await?;
        Ok(ret._0)
    }

    pub async fn total_fees_collected(&self) -> Result<U256, ReadError> {
        let ret = self
            .call(
                "totalFeesCollected",
                IDeFiAgentVault::totalFeesCollectedCall {},
            )
            .await?;
        Ok(ret._0)
    }

    pub async fn estimated_apy(&self) -> Result<U256, ReadError> {
        let ret = self
            .call("estimatedAPY", IDeFiAgentVault::estimatedAPYCall {})
            .await?;
        Ok(ret._0)
    }

    pub async fn owner(&self) -> Result<Address, ReadError> {
        let ret = self.call("owner", IDeFiAgentVault::ownerCall {}).await?;
        Ok(ret._0)
    }

    pub async fn is_agent(&self, account: Address) -> Result<bool, ReadError> {
        let ret = self
            .call("isAgent", IDeFiAgentVault::isAgentCall { account })
            .await?;
        Ok(ret._0)
    }

    pub async fn user_deposit_eth(&self, user: Address) -> Result<U256, ReadError> {
        let ret = self
            .call("userDepositETH", IDeFiAgentVault::userDepositETHCall { user })
            .await?;
        Ok(ret._0)
    }

    pub async fn user_deposit_erc20(&self, user: Address, token: Address) -> Result<U256, ReadError> {
        let ret = self
            .call(
                "userDepositERC20",
                IDeFiAgentVault::userDepositERC20Call { user, token },
            )
            .await?;
        Ok(ret._0)
    }

    /// Broadcasts a write. Resolution happens through the returned handle.
    pub async fn submit(
        &self,
        from: Address,
        call: &VaultCall,
        value: U256,
    ) -> Result<TransactionHandle, MutationFailure> {
        let request = WriteRequest {
            from,
            to: self.contract,
            calldata: call.encode(),
            value,
        };
        debug!(function = call.function_name(), %from, %value, "submitting vault write");
        let hash = self
            .client
            .write(request)
            .await
            .map_err(MutationFailure::from_submission)?;
        Ok(TransactionHandle {
            hash,
            client: Arc::clone(&self.client),
        })
    }

    pub async fn subscribe(&self, kind: VaultEventKind) -> Result<LogStream, ClientError> {
        self.client
            .subscribe(self.contract, kind.signature_hash())
            .await
    }
}
