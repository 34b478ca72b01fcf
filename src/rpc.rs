use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Fixed request id; one request is in flight per call.
const REQUEST_ID: u64 = 1;

/// A JSON-RPC 2.0 endpoint of a ledger node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Issue one request and return the full response envelope.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

/// JSON-RPC over HTTP(S) POST. No retries, no caching.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl NodeRpc for RpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: REQUEST_ID,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("{}: HTTP {}", method, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", method, e)))?;

        serde_json::from_slice(&body)
            .map_err(|e| Error::Protocol(format!("{}: response is not JSON: {}", method, e)))
    }
}

/// Unwrap the `result` member of a response envelope.
///
/// A non-null `error` member is reported as a protocol error.
pub fn into_result(method: &str, mut response: Value) -> Result<Value> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        return Err(Error::Protocol(format!("{} failed: {}", method, error)));
    }

    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(Error::Protocol(format!("{}: response has no result", method))),
    }
}
