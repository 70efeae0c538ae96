//! JSON-RPC 1.0 client for the Bitcoin full node.
//!
//! Only the two calls the pool needs are exposed. The client is a thin,
//! internally serialized wrapper around a reqwest connection pool; callers
//! share it behind an `Arc`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::RpcConfig;
use crate::error::{Error, Result};

/// `getblocktemplate` result, limited to the fields the pool consumes.
///
/// Unknown fields are ignored, which keeps the client compatible across
/// node versions.
#[derive(Debug, Clone, Deserialize)]
pub struct GetBlockTemplate {
    /// The preferred block version.
    pub version: i32,
    /// The hash of the current highest block.
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    /// Non-coinbase transactions to include, in block order.
    pub transactions: Vec<GbtTransaction>,
    /// Data to include in the coinbase scriptSig; keys are ignored.
    #[serde(rename = "coinbaseaux", default)]
    pub coinbase_aux: BTreeMap<String, String>,
    /// Reward plus fees available to the coinbase, in satoshis.
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: u64,
    /// Minimum timestamp appropriate for the next block.
    #[serde(rename = "mintime")]
    pub min_time: u32,
    /// Current node time.
    #[serde(rename = "curtime")]
    pub current_time: u32,
    /// Compact target of the next block, as hex.
    pub bits: String,
    /// Height of the next block.
    pub height: u64,
    /// Witness commitment scriptPubKey, as hex, when segwit is active.
    #[serde(default)]
    pub default_witness_commitment: Option<String>,
}

/// One transaction entry inside a block template.
#[derive(Debug, Clone, Deserialize)]
pub struct GbtTransaction {
    /// Raw transaction, hex encoded.
    pub data: String,
    /// Transaction id in display order.
    pub txid: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client with basic auth.
#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl NodeClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| Error::Rpc(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "solopool",
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Rpc(format!("{method}: {e}")))?;

        let status = response.status();

        // bitcoind reports RPC-level failures with a JSON body and a 500
        // status, so try to parse a body before falling back to the status.
        let parsed: RpcResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(Error::Rpc(format!("{method}: bad response body: {e}")));
            }
            Err(_) => return Err(Error::Rpc(format!("{method}: HTTP {status}"))),
        };

        if let Some(err) = parsed.error {
            return Err(Error::Rpc(format!(
                "{method}: {} (code {})",
                err.message, err.code
            )));
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Fetch a segwit block template.
    pub async fn get_block_template(&self) -> Result<GetBlockTemplate> {
        let result = self
            .call("getblocktemplate", json!([{"rules": ["segwit"]}]))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| Error::Rpc(format!("getblocktemplate: bad template: {e}")))
    }

    /// Submit a serialized block; `None` means the node accepted it.
    pub async fn submit_block(&self, block_hex: String) -> Result<Option<String>> {
        match self.call("submitblock", json!([block_hex])).await? {
            Value::Null => Ok(None),
            Value::String(reason) => Ok(Some(reason)),
            other => Ok(Some(other.to_string())),
        }
    }
}
