use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, B256};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChainClient, LogStream, RawLog, TxReceipt, WriteRequest};
use crate::config::ChainConfig;
use crate::errors::ClientError;

const JSONRPC_VERSION: &str = "2.0";
/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;
/// Geth-style "server error" returned when a transaction is refused.
const SERVER_ERROR_CODE: i64 = -32000;
/// "Transaction rejected".
const TX_REJECTED_CODE: i64 = -32003;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptDto {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogDto {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
}

/// Polling intervals used by [`JsonRpcChainClient`].
#[derive(Clone, Copy, Debug)]
pub struct PollingConfig {
    pub receipt_interval: Duration,
    pub receipt_timeout: Duration,
    pub log_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            receipt_interval: Duration::from_secs(1),
            receipt_timeout: Duration::from_secs(120),
            log_interval: Duration::from_secs(4),
        }
    }
}

#[derive(Debug)]
struct Inner {
    http: Client,
    url: Url,
    next_id: AtomicU64,
}

/// Ethereum JSON-RPC client over HTTP.
///
/// Writes go through `eth_sendTransaction`, so the node or wallet bridge
/// behind the endpoint holds the keys. Subscriptions poll `eth_getLogs`.
#[derive(Clone, Debug)]
pub struct JsonRpcChainClient {
    inner: Arc<Inner>,
    account: Option<Address>,
    chain_id: u64,
    polling: PollingConfig,
}

impl JsonRpcChainClient {
    pub fn from_endpoint(
        endpoint: &str,
        account: Option<Address>,
        chain_id: u64,
        timeout: Duration,
        polling: PollingConfig,
    ) -> Result<Self, ClientError> {
        let url = Url::parse(endpoint)
            .map_err(|err| ClientError::Transport(format!("invalid RPC endpoint: {err}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::transport)?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                url,
                next_id: AtomicU64::new(1),
            }),
            account,
            chain_id,
            polling,
        })
    }

    /// Builds a client from the `[chain]` section and polling settings.
    pub fn from_config(config: &ChainConfig, polling: PollingConfig) -> Result<Self, ClientError> {
        let account = config
            .account_address()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Self::from_endpoint(
            &config.rpc_endpoint,
            account,
            config.chain_id,
            Duration::from_millis(config.request_timeout_ms),
            polling,
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.url
    }

    /// Issues a raw JSON-RPC call returning the untyped result.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.inner.request(method, params).await
    }

    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, ClientError> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(ClientError::decode)
    }

    pub async fn block_number(&self) -> Result<u64, ClientError> {
        self.inner.block_number().await
    }

    pub async fn remote_chain_id(&self) -> Result<u64, ClientError> {
        let value: String = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&value)
    }
}

impl Inner {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let payload = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(ClientError::transport)?;
        if !response.status().is_success() {
            return Err(http_status_error(response.status()));
        }

        let response: JsonRpcResponse = response.json().await.map_err(ClientError::decode)?;
        if let Some(error) = response.error {
            return Err(classify_rpc_error(method, error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn block_number(&self) -> Result<u64, ClientError> {
        let value = self.request("eth_blockNumber", json!([])).await?;
        let value = value
            .as_str()
            .ok_or_else(|| ClientError::decode("eth_blockNumber returned a non-string"))?;
        parse_quantity(value)
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ClientError> {
        let value = self
            .request("eth_getTransactionReceipt", json!([encode_hex(hash.as_slice())]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let receipt: ReceiptDto = serde_json::from_value(value).map_err(ClientError::decode)?;
        TxReceipt::try_from(receipt).map(Some)
    }

    async fn logs(
        &self,
        contract: Address,
        event: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, ClientError> {
        let filter = json!({
            "address": encode_hex(contract.as_slice()),
            "topics": [encode_hex(event.as_slice())],
            "fromBlock": format!("{from:#x}"),
            "toBlock": format!("{to:#x}"),
        });
        let value = self.request("eth_getLogs", json!([filter])).await?;
        let logs: Vec<LogDto> = serde_json::from_value(value).map_err(ClientError::decode)?;
        logs.into_iter().map(RawLog::try_from).collect()
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn read(&self, contract: Address, calldata: Bytes) -> Result<Bytes, ClientError> {
        let call = json!({
            "to": encode_hex(contract.as_slice()),
            "data": encode_hex(&calldata),
        });
        let value: String = self.call("eth_call", json!([call, "latest"])).await?;
        decode_hex(&value).map(Bytes::from)
    }

    async fn write(&self, request: WriteRequest) -> Result<TxHash, ClientError> {
        let mut tx = json!({
            "from": encode_hex(request.from.as_slice()),
            "to": encode_hex(request.to.as_slice()),
            "data": encode_hex(&request.calldata),
        });
        if !request.value.is_zero() {
            tx["value"] = Value::String(format!("{:#x}", request.value));
        }
        let value: String = self
            .call("eth_sendTransaction", json!([tx]))
            .await
            .map_err(|error| match error {
                // Any refusal while sending means the transaction never left the client.
                ClientError::Reverted(reason) => ClientError::Rejected(reason),
                other => other,
            })?;
        parse_hash(&value)
    }

    async fn await_receipt(&self, hash: TxHash) -> Result<TxReceipt, ClientError> {
        poll_receipt(
            hash,
            self.polling.receipt_interval,
            self.polling.receipt_timeout,
            move || self.inner.receipt(hash),
        )
        .await
    }

    async fn subscribe(&self, contract: Address, event: B256) -> Result<LogStream, ClientError> {
        let mut cursor = self.inner.block_number().await?.saturating_add(1);
        let inner = Arc::clone(&self.inner);
        let interval = self.polling.log_interval;
        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if tx.is_closed() {
                    break;
                }
                let head = match inner.block_number().await {
                    Ok(head) => head,
                    Err(error) => {
                        warn!(%error, %event, "log poll failed to read head");
                        continue;
                    }
                };
                if head < cursor {
                    continue;
                }
                match inner.logs(contract, event, cursor, head).await {
                    Ok(logs) => {
                        debug!(count = logs.len(), from = cursor, to = head, "polled vault logs");
                        cursor = head + 1;
                        for log in logs {
                            if tx.unbounded_send(Ok(log)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => {
                        if tx.unbounded_send(Err(error)).is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx.boxed())
    }

    fn current_address(&self) -> Option<Address> {
        self.account
    }

    fn current_chain(&self) -> u64 {
        self.chain_id
    }
}

impl TryFrom<ReceiptDto> for TxReceipt {
    type Error = ClientError;

    fn try_from(dto: ReceiptDto) -> Result<Self, Self::Error> {
        let block_number = dto.block_number.as_deref().map(parse_quantity).transpose()?;
        let success = match dto.status.as_deref() {
            Some(status) => parse_quantity(status)? == 1,
            // Pre-Byzantium receipts carry no status; treat mined as success.
            None => true,
        };
        Ok(TxReceipt {
            hash: parse_hash(&dto.transaction_hash)?,
            block_number,
            success,
        })
    }
}

impl TryFrom<LogDto> for RawLog {
    type Error = ClientError;

    fn try_from(dto: LogDto) -> Result<Self, Self::Error> {
        let address = Address::from_str(&dto.address).map_err(ClientError::decode)?;
        let topics = dto
            .topics
            .iter()
            .map(|topic| parse_hash(topic))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawLog {
            address,
            topics,
            data: Bytes::from(decode_hex(&dto.data)?),
            block_number: dto.block_number.as_deref().map(parse_quantity).transpose()?,
            transaction_hash: dto.transaction_hash.as_deref().map(parse_hash).transpose()?,
        })
    }
}

/// Polls `fetch` until a receipt shows up or `timeout` elapses. Transport
/// failures are retried: the transaction is already broadcast, so a flaky
/// endpoint must not turn it into a failed write.
async fn poll_receipt<F, Fut>(
    hash: TxHash,
    interval: Duration,
    timeout: Duration,
    mut fetch: F,
) -> Result<TxReceipt, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<TxReceipt>, ClientError>>,
{
    let started = tokio::time::Instant::now();
    loop {
        match fetch().await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            Err(ClientError::Transport(reason)) => {
                warn!(%hash, %reason, "receipt poll failed; retrying");
            }
            Err(error) => return Err(error),
        }
        if started.elapsed() >= timeout {
            return Err(ClientError::Transport(format!(
                "no receipt for {hash} after {timeout:?}"
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

fn classify_rpc_error(method: &str, error: JsonRpcError) -> ClientError {
    let message = format!("{} (code {})", error.message, error.code);
    match error.code {
        USER_REJECTED_CODE => ClientError::Rejected(message),
        SERVER_ERROR_CODE | TX_REJECTED_CODE if method == "eth_sendTransaction" => {
            ClientError::Rejected(message)
        }
        _ if error.message.contains("execution reverted") => ClientError::Reverted(message),
        _ => ClientError::Transport(format!("{method}: {message}")),
    }
}

fn http_status_error(status: StatusCode) -> ClientError {
    ClientError::Transport(format!("HTTP status {status}"))
}

fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn decode_hex(value: &str) -> Result<Vec<u8>, ClientError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(ClientError::decode)
}

fn parse_quantity(value: &str) -> Result<u64, ClientError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(ClientError::decode)
}

fn parse_hash(value: &str) -> Result<B256, ClientError> {
    B256::from_str(value).map_err(ClientError::decode)
}
