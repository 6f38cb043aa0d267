use serde_json::{json, Value};
use tracing::debug;

use xln_core::{JBlock, XlnError};

use crate::embedded::JBatchTx;

/// JSON-RPC 2.0 client toward an external jurisdiction node, used by the
/// 1 Hz poll loop in `rpc` mode.
///
/// Raw HTTP POST with serde_json rather than a full jsonrpsee client:
/// the surface is four methods and the node binary stays lean.
pub struct JRpcClient {
    url: String,
    client: reqwest::Client,
}

impl JRpcClient {
    pub fn new(url: &str) -> Self {
        Self { url: url.to_string(), client: reqwest::Client::new() }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, XlnError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| XlnError::ChainUnavailable { detail: e.to_string() })?;
        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| XlnError::ChainUnavailable { detail: e.to_string() })?;
        if let Some(err) = parsed.get("error") {
            return Err(XlnError::ChainUnavailable { detail: err.to_string() });
        }
        Ok(parsed["result"].clone())
    }

    /// The chain's registered event-name table, checked against ours at
    /// startup.
    pub async fn event_schema(&self) -> Result<Vec<String>, XlnError> {
        let result = self.call("xlnj_getEventSchema", json!([])).await?;
        serde_json::from_value(result).map_err(|e| XlnError::ChainUnavailable { detail: e.to_string() })
    }

    pub async fn head(&self) -> Result<u64, XlnError> {
        let result = self.call("xlnj_getHead", json!([])).await?;
        result
            .as_u64()
            .ok_or(XlnError::ChainUnavailable { detail: "non-numeric head".to_string() })
    }

    /// Fetch `[from, to]` inclusive, grouped by `(block_number, block_hash)`.
    pub async fn blocks(&self, from: u64, to: u64) -> Result<Vec<JBlock>, XlnError> {
        let result = self.call("xlnj_getBlocks", json!([from, to])).await?;
        serde_json::from_value(result).map_err(|e| XlnError::ChainUnavailable { detail: e.to_string() })
    }

    pub async fn submit_batch(&self, batch: &JBatchTx) -> Result<String, XlnError> {
        let params = serde_json::to_value(batch).map_err(|e| XlnError::Codec(e.to_string()))?;
        let result = self.call("xlnj_submitBatch", json!([params])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or(XlnError::BatchBroadcastFailed { detail: "no tx hash in reply".to_string() })
    }

    /// One poll step: everything past `cursor` up to the current head.
    /// `CHAIN_UNAVAILABLE` leaves the cursor untouched at the caller.
    pub async fn poll_since(&self, cursor: u64) -> Result<Vec<JBlock>, XlnError> {
        let head = self.head().await?;
        if head <= cursor {
            return Ok(Vec::new());
        }
        debug!(from = cursor + 1, to = head, "polling jurisdiction blocks");
        self.blocks(cursor + 1, head).await
    }
}
