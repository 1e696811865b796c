//! JSON-RPC 2.0 over HTTP transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use fleetgate_core::{RpcError, RpcOptions, RpcTransport};
use serde::Deserialize;
use serde_json::{Value, json};

/// Reaches each node at a configured URL by its public key.
pub struct HttpRpcTransport {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcReplyError>,
}

#[derive(Deserialize)]
struct RpcReplyError {
    message: String,
}

impl HttpRpcTransport {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoints)
    }

    pub fn with_client(client: reqwest::Client, endpoints: HashMap<String, String>) -> Self {
        Self {
            client,
            endpoints,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    async fn request(
        &self,
        node_key: &str,
        method: &str,
        payload: &Value,
        opts: RpcOptions,
    ) -> Result<Value, RpcError> {
        let url = self
            .endpoints
            .get(node_key)
            .ok_or_else(|| RpcError::UnknownNode(node_key.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": payload,
        });

        let response = self
            .client
            .post(url)
            .timeout(opts.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::transport(format!("node replied with HTTP {status}")));
        }

        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| RpcError::transport(format!("invalid reply: {e}")))?;

        match (reply.result, reply.error) {
            (_, Some(err)) => Err(RpcError::remote(err.message)),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}
