//! Upstream RPC collaborator.
//!
//! The gateway never speaks a node's wire protocol directly. Everything goes
//! through [`RpcTransport`], which accepts a destination key, a method name, a
//! JSON payload and an options bag, and either resolves with the node's result
//! or rejects with an [`RpcError`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Default per-call timeout applied to every upstream request.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Options attached to every upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcOptions {
    pub timeout: Duration,
}

impl RpcOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// Errors a single upstream call can reject with.
///
/// The `Display` output is what ends up in the in-band `{ "error": ... }`
/// entries of an isolated fan-out, so it stays short and free of node keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The call did not settle within the configured timeout.
    #[error("ERR_RPC_TIMEOUT")]
    Timeout,

    /// No route is known for the destination key.
    #[error("ERR_RPC_UNKNOWN_NODE")]
    UnknownNode(String),

    /// The request could not be delivered or the reply could not be read.
    #[error("{0}")]
    Transport(String),

    /// The node processed the call and answered with an error.
    #[error("{0}")]
    Remote(String),
}

impl RpcError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }
}

/// Transport used to reach backend nodes.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Issue `method` with `payload` against the node identified by `node_key`.
    async fn request(
        &self,
        node_key: &str,
        method: &str,
        payload: &Value,
        opts: RpcOptions,
    ) -> Result<Value, RpcError>;
}
