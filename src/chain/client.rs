//! Chain JSON-RPC Client
//!
//! Speaks the JSON-RPC dialect of Bitcoin-like chain daemons. Dialect
//! differences between chains are modeled as a capability set checked once at
//! startup, never by version-string introspection in hot paths.

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Transaction, Txid};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Chain client errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    /// Whether a retry with backoff can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// What the connected chain daemon supports
#[derive(Debug, Clone, Copy)]
pub struct ChainCapabilities {
    pub estimate_smart_fee: bool,
    pub zmq_notifications: bool,
    pub verbose_blocks: bool,
}

impl Default for ChainCapabilities {
    fn default() -> Self {
        Self {
            estimate_smart_fee: true,
            zmq_notifications: true,
            verbose_blocks: true,
        }
    }
}

/// Subset of `getblockchaininfo` the engine uses
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
}

/// A block with its transactions as raw hex (`getblock` verbosity 2)
#[derive(Debug, Clone)]
pub struct VerboseBlock {
    pub hash: String,
    pub height: u64,
    pub tx: Vec<String>,
}

/// One entry of `getzmqnotifications`
#[derive(Debug, Clone, Deserialize)]
pub struct ZmqNotification {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub address: String,
}

/// Notification delivered by the daemon's pub/sub channel, at-least-once
#[derive(Debug, Clone)]
pub enum ChainNotification {
    /// Raw transaction accepted to the mempool or included in a block
    Transaction(Transaction),
    /// New block at the given height with its txids
    Block { height: u64, txids: Vec<Txid> },
}

/// Chain daemon operations the engine consumes
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, ChainError>;
    async fn get_block_hash(&self, height: u64) -> Result<String, ChainError>;
    async fn get_block(&self, hash: &str) -> Result<VerboseBlock, ChainError>;
    async fn get_raw_transaction(&self, txid: &str) -> Result<String, ChainError>;
    async fn send_raw_transaction(&self, hex: &str) -> Result<String, ChainError>;

    /// Recommended fee rate in sat/vB for the given confirmation target
    async fn estimate_fee(&self, target: u16) -> Result<f64, ChainError>;

    fn capabilities(&self) -> ChainCapabilities;
}

/// JSON-RPC client for bitcoind-compatible daemons
pub struct CoreRpcClient {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
    capabilities: ChainCapabilities,
}

impl CoreRpcClient {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
        capabilities: ChainCapabilities,
    ) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Http(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
            user: user.into(),
            password: password.into(),
            capabilities,
        })
    }

    /// The pub/sub endpoints the daemon exposes. Used at startup to verify
    /// the notification plumbing before any swap is accepted.
    pub async fn get_zmq_notifications(&self) -> Result<Vec<ZmqNotification>, ChainError> {
        let result = self.rpc("getzmqnotifications", json!([])).await?;
        serde_json::from_value(result).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "swapd",
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        let payload: Value = response.json().await?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(ChainError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::InvalidResponse("missing result field".to_string()))
    }
}

#[async_trait]
impl ChainClient for CoreRpcClient {
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, ChainError> {
        let result = self.rpc("getblockchaininfo", json!([])).await?;
        serde_json::from_value(result).map_err(|e| ChainError::InvalidResponse(e.to_string()))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ChainError> {
        let result = self.rpc("getblockhash", json!([height])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse("block hash is not a string".to_string()))
    }

    async fn get_block(&self, hash: &str) -> Result<VerboseBlock, ChainError> {
        let verbosity = if self.capabilities.verbose_blocks { 2 } else { 1 };
        let result = self.rpc("getblock", json!([hash, verbosity])).await?;

        let height = result
            .get("height")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainError::InvalidResponse("block height missing".to_string()))?;

        let raw_txs = result
            .get("tx")
            .and_then(Value::as_array)
            .ok_or_else(|| ChainError::InvalidResponse("block tx list missing".to_string()))?;

        let mut tx = Vec::with_capacity(raw_txs.len());
        for entry in raw_txs {
            if self.capabilities.verbose_blocks {
                let hex = entry
                    .get("hex")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChainError::InvalidResponse("tx hex missing".to_string()))?;
                tx.push(hex.to_string());
            } else {
                // Daemons without verbose blocks only list txids; fetch each.
                let txid = entry.as_str().ok_or_else(|| {
                    ChainError::InvalidResponse("txid is not a string".to_string())
                })?;
                tx.push(self.get_raw_transaction(txid).await?);
            }
        }

        Ok(VerboseBlock {
            hash: hash.to_string(),
            height,
            tx,
        })
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<String, ChainError> {
        let result = self.rpc("getrawtransaction", json!([txid])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse("transaction is not a string".to_string()))
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String, ChainError> {
        let result = self.rpc("sendrawtransaction", json!([hex])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse("txid is not a string".to_string()))
    }

    async fn estimate_fee(&self, target: u16) -> Result<f64, ChainError> {
        // TODO: fall back to legacy `estimatefee` for daemons that predate
        // estimatesmartfee.
        if !self.capabilities.estimate_smart_fee {
            return Ok(2.0);
        }

        let result = self.rpc("estimatesmartfee", json!([target])).await?;
        match result.get("feerate").and_then(Value::as_f64) {
            // estimatesmartfee returns BTC/kvB
            Some(btc_per_kvb) => Ok(btc_per_kvb * 100_000_000.0 / 1_000.0),
            // No estimate available (fresh chain, regtest): use the floor.
            None => Ok(2.0),
        }
    }

    fn capabilities(&self) -> ChainCapabilities {
        self.capabilities
    }
}
