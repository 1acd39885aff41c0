//! Network connection used by the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chain_sol::{serialize_transaction, SolTransaction};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::WalletConfig;
use crate::types::{Checkpoint, Commitment};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("RPC request timed out after {0} ms")]
    Timeout(u64),
}

/// What the pipeline needs from the network.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Most recent blockhash and the last block height it stays valid for.
    async fn latest_checkpoint(&self) -> Result<Checkpoint, ConnectionError>;

    /// Submit a signed transaction. Returns the transaction signature the
    /// network reports.
    async fn send_transaction(&self, tx: &SolTransaction) -> Result<String, ConnectionError>;
}

/// Solana JSON-RPC over HTTP.
#[derive(Debug, Clone)]
pub struct RpcConnection {
    http: Client,
    url: String,
    commitment: Commitment,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockhashValue {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

impl RpcConnection {
    pub fn new(url: &str, commitment: Commitment, timeout: Duration) -> Result<Self, ConnectionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
            commitment,
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn from_config(config: &WalletConfig) -> Result<Self, ConnectionError> {
        Self::new(&config.rpc_url, config.commitment, config.rpc_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::debug!(method, id, "RPC call");

        let resp = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectionError::Transport(format!("{method}: HTTP {status}: {body}")));
        }

        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| ConnectionError::InvalidResponse(format!("{method}: {e}")))?;

        match (body.result, body.error) {
            (_, Some(err)) => Err(ConnectionError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(ConnectionError::InvalidResponse(format!(
                "{method}: neither result nor error"
            ))),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ConnectionError {
        if e.is_timeout() {
            ConnectionError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ConnectionError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Connection for RpcConnection {
    async fn latest_checkpoint(&self) -> Result<Checkpoint, ConnectionError> {
        let result = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": self.commitment.as_str() }]),
            )
            .await?;
        let parsed: WithContext<BlockhashValue> = serde_json::from_value(result)
            .map_err(|e| ConnectionError::InvalidResponse(format!("getLatestBlockhash: {e}")))?;

        let blockhash: [u8; 32] = bs58::decode(&parsed.value.blockhash)
            .into_vec()
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                ConnectionError::InvalidResponse(format!(
                    "blockhash {} is not 32 base58 bytes",
                    parsed.value.blockhash
                ))
            })?;

        Ok(Checkpoint {
            blockhash,
            last_valid_block_height: parsed.value.last_valid_block_height,
        })
    }

    async fn send_transaction(&self, tx: &SolTransaction) -> Result<String, ConnectionError> {
        let wire = bs58::encode(serialize_transaction(tx)).into_string();
        let result = self
            .call(
                "sendTransaction",
                json!([
                    wire,
                    {
                        "encoding": "base58",
                        "preflightCommitment": self.commitment.as_str(),
                    }
                ]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConnectionError::InvalidResponse("sendTransaction: expected a string".into()))
    }
}
