use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::error::{IndexerError, Result};
use crate::types::Transaction;

/// Read access to the chain, as the ingestion pipeline needs it.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Current chain tip.
    async fn latest_block_number(&self) -> Result<u64>;

    /// First block of the chain, from the policy constants.
    async fn genesis_block_number(&self) -> Result<u64>;

    /// All transactions mined in `block_number`. An empty vec is an empty block,
    /// not a failure.
    async fn transactions_for_block(&self, block_number: u64) -> Result<Vec<Transaction>>;
}

/// JSON-RPC 2.0 client for a Nimiq node.
///
/// Holds a single `reqwest::Client`, so connections are pooled across every
/// caller that shares this source.
pub struct RpcBlockSource {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<RpcResult<T>>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcResult<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyConstants {
    genesis_block_number: u64,
}

impl RpcBlockSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::SourceUnavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// POST one JSON-RPC call and return `result.data`. Every failure is
    /// flattened to a message; callers decide which error kind it becomes.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<Option<T>, String> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("{method}: request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("{method}: HTTP {}", response.status()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("{method}: reading body failed: {e}"))?;

        parse_envelope(&body).map_err(|e| format!("{method}: {e}"))
    }
}

/// Extract `result.data` from a JSON-RPC response body.
///
/// `Ok(None)` means the call succeeded but carried no data.
pub(crate) fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> std::result::Result<Option<T>, String> {
    let response: RpcResponse<T> =
        serde_json::from_slice(body).map_err(|e| format!("malformed response: {e}"))?;

    if let Some(err) = response.error {
        return Err(format!("RPC error {}: {}", err.code, err.message));
    }

    Ok(response.result.and_then(|r| r.data))
}

#[async_trait]
impl BlockSource for RpcBlockSource {
    async fn latest_block_number(&self) -> Result<u64> {
        self.call::<u64>("getBlockNumber", json!([]))
            .await
            .map_err(IndexerError::SourceUnavailable)?
            .ok_or_else(|| IndexerError::SourceUnavailable("getBlockNumber: missing result.data".to_string()))
    }

    async fn genesis_block_number(&self) -> Result<u64> {
        let constants = self
            .call::<PolicyConstants>("getPolicyConstants", json!([]))
            .await
            .map_err(IndexerError::SourceUnavailable)?
            .ok_or_else(|| {
                IndexerError::SourceUnavailable("getPolicyConstants: missing result.data".to_string())
            })?;
        Ok(constants.genesis_block_number)
    }

    async fn transactions_for_block(&self, block_number: u64) -> Result<Vec<Transaction>> {
        let transactions = self
            .call::<Vec<Transaction>>("getTransactionsByBlockNumber", json!([block_number]))
            .await
            .map_err(|cause| IndexerError::FetchFailed { block: block_number, cause })?;

        if transactions.is_none() {
            tracing::debug!(block = block_number, "No transaction data in response, treating as empty block");
        }
        Ok(transactions.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_number() {
        let body = br#"{"jsonrpc":"2.0","result":{"data":16335600,"metadata":null},"id":1}"#;
        let n: Option<u64> = parse_envelope(body).unwrap();
        assert_eq!(n, Some(16335600));
    }

    #[test]
    fn parses_policy_constants() {
        let body = br#"{"jsonrpc":"2.0","result":{"data":{"genesisBlockNumber":16300000,"blocksPerBatch":60}},"id":0}"#;
        let c: Option<PolicyConstants> = parse_envelope(body).unwrap();
        assert_eq!(c.unwrap().genesis_block_number, 16300000);
    }

    #[test]
    fn null_data_is_empty_not_error() {
        let body = br#"{"jsonrpc":"2.0","result":{"data":null},"id":1}"#;
        let txs: Option<Vec<Transaction>> = parse_envelope(body).unwrap();
        assert!(txs.is_none());

        let body = br#"{"jsonrpc":"2.0","result":{"data":[]},"id":1}"#;
        let txs: Option<Vec<Transaction>> = parse_envelope(body).unwrap();
        assert_eq!(txs, Some(vec![]));
    }

    #[test]
    fn rpc_error_object_is_a_failure() {
        let body = br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":1}"#;
        let err = parse_envelope::<u64>(body).unwrap_err();
        assert!(err.contains("-32603"));
    }

    #[test]
    fn garbage_body_is_a_failure() {
        let err = parse_envelope::<u64>(b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(err.starts_with("malformed response"));
    }

    #[tokio::test]
    async fn unreachable_node_maps_to_error_kinds() {
        // Port 9 (discard) on localhost is closed in any sane test environment.
        let source = RpcBlockSource::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();

        let err = source.latest_block_number().await.unwrap_err();
        assert!(matches!(err, IndexerError::SourceUnavailable(_)));

        let err = source.transactions_for_block(42).await.unwrap_err();
        assert!(matches!(err, IndexerError::FetchFailed { block: 42, .. }));
    }
}
