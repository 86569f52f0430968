//! EVM JSON-RPC client for the receipt processing worker.
//!
//! Exposes the small surface the rest of the worker needs:
//! `getTransactionReceipt`, `getBlockNumber`, `getCode`, and `eth_call`.
//! Transport errors are retried with a fixed delay; an RPC-level `error`
//! object is logged and surfaced as `Ok(None)` without retry.

use anyhow::{Context, Result};
use chain_clients_common::normalize_hex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Configuration for the RPC facade, matching `settings.json`'s `rpc` block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcConfig {
    pub url: String,
    /// Number of *additional* attempts after the first, on transport error.
    pub retry: u32,
    pub request_time_out: u64,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: Vec<serde_json::Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A single EVM event log as returned inside a transaction receipt.
///
/// `address`/`topics`/`data`/`log_index` are named out because the worker
/// reads them directly; everything else the node returns (`removed`,
/// `blockNumber`, `blockHash`, `transactionHash`, per-log `transactionIndex`,
/// …) round-trips through `extra` so re-serializing a `Log` reproduces the
/// node's original document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "logIndex")]
    pub log_index: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Transaction receipt as returned by `eth_getTransactionReceipt`.
///
/// `block_number`/`transaction_index`/`logs` are named out because the
/// worker reads them directly; every other field the node returns
/// (`status`, `gasUsed`, `from`, `to`, `cumulativeGasUsed`,
/// `effectiveGasPrice`, `contractAddress`, `blockHash`, …) round-trips
/// through `extra`, so re-serializing a `TransactionReceipt` reproduces the
/// node's full, original document rather than a narrowed one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionReceipt {
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionIndex")]
    pub transaction_index: String,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct EvmRpcClient {
    http: reqwest::Client,
    url: String,
    retry: u32,
}

impl EvmRpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_time_out))
            .build()
            .context("failed to build HTTP client for EVM RPC facade")?;

        Ok(Self {
            http,
            url: config.url.clone(),
            retry: config.retry,
        })
    }

    async fn make_request<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let attempts = self.retry + 1;
        for attempt in 0..attempts {
            match self.http.post(&self.url).json(&request).send().await {
                Ok(response) => {
                    let body: JsonRpcResponse<T> = response
                        .json()
                        .await
                        .with_context(|| format!("failed to parse {} response", method))?;

                    if let Some(error) = body.error {
                        warn!(
                            method,
                            code = error.code,
                            message = %error.message,
                            "RPC call returned an error object"
                        );
                        return Ok(None);
                    }

                    return Ok(body.result);
                }
                Err(err) => {
                    if attempt + 1 == attempts {
                        return Err(err).with_context(|| {
                            format!("{} failed after {} attempt(s)", method, attempts)
                        });
                    }
                    warn!(
                        method,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %err,
                        "transport error calling RPC, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        unreachable!("loop always returns before exhausting attempts")
    }

    /// Fetches a transaction receipt. `Ok(None)` means the node has no
    /// receipt for this hash yet (pending or unknown) — not an error.
    pub async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>> {
        self.make_request(
            "eth_getTransactionReceipt",
            vec![serde_json::json!(hash)],
        )
        .await
    }

    /// Fetches the current chain head block number.
    pub async fn get_block_number(&self) -> Result<u64> {
        let result: Option<String> = self.make_request("eth_blockNumber", vec![]).await?;
        let hex = result.context("eth_blockNumber returned no result")?;
        chain_clients_common::parse_hex_u64(&hex).context("failed to parse block number")
    }

    /// Fetches the deployed bytecode at `address`. Returns an empty vector
    /// for EOAs or undeployed addresses (`eth_getCode` returning `0x`).
    pub async fn get_code(&self, address: &str) -> Result<Vec<u8>> {
        let address = normalize_hex(address);
        let result: Option<String> = self
            .make_request("eth_getCode", vec![serde_json::json!(address), serde_json::json!("latest")])
            .await?;
        match result {
            None => Ok(Vec::new()),
            Some(hex_str) => {
                let trimmed = hex_str.strip_prefix("0x").unwrap_or(&hex_str);
                if trimmed.is_empty() {
                    return Ok(Vec::new());
                }
                hex::decode(trimmed).context("failed to decode eth_getCode result")
            }
        }
    }

    /// Performs a read-only `eth_call` against `to` with the given ABI-encoded
    /// calldata, at the latest block.
    pub async fn call(&self, to: &str, calldata: &[u8]) -> Result<Vec<u8>> {
        let call_object = serde_json::json!({
            "to": to,
            "data": format!("0x{}", hex::encode(calldata)),
        });
        let result: Option<String> = self
            .make_request("eth_call", vec![call_object, serde_json::json!("latest")])
            .await?;
        let hex_str = result.context("eth_call returned no result")?;
        let trimmed = hex_str.strip_prefix("0x").unwrap_or(&hex_str);
        hex::decode(trimmed).context("failed to decode eth_call result")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(url: String) -> RpcConfig {
        RpcConfig {
            url,
            retry: 2,
            request_time_out: 5,
        }
    }

    #[tokio::test]
    async fn get_block_number_parses_hex_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "result": "0x10",
                "id": 1
            })))
            .mount(&server)
            .await;

        let client = EvmRpcClient::new(&config_for(server.uri())).unwrap();
        let block = client.get_block_number().await.unwrap();
        assert_eq!(block, 16);
    }

    #[tokio::test]
    async fn rpc_error_object_yields_none_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "execution reverted"},
                "id": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = EvmRpcClient::new(&config_for(server.uri())).unwrap();
        let receipt = client
            .get_transaction_receipt("0xabc")
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn missing_receipt_is_none_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "result": null,
                "id": 1
            })))
            .mount(&server)
            .await;

        let client = EvmRpcClient::new(&config_for(server.uri())).unwrap();
        let receipt = client.get_transaction_receipt("0xdead").await.unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn get_code_empty_bytecode_is_empty_vec() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "result": "0x",
                "id": 1
            })))
            .mount(&server)
            .await;

        let client = EvmRpcClient::new(&config_for(server.uri())).unwrap();
        let code = client.get_code("0xabc").await.unwrap();
        assert!(code.is_empty());
    }
}
