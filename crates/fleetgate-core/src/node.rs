use serde::{Deserialize, Serialize};

/// A backend store that the gateway fans requests out to.
///
/// The node is addressed only by the public key its RPC server listens on;
/// how that key is turned into a connection is up to the [`RpcTransport`].
///
/// [`RpcTransport`]: crate::rpc::RpcTransport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendNode {
    // Some config sources lowercase keys.
    #[serde(rename = "rpcPublicKey", alias = "rpcpublickey")]
    pub rpc_public_key: String,
}

impl BackendNode {
    pub fn new(rpc_public_key: impl Into<String>) -> Self {
        Self {
            rpc_public_key: rpc_public_key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.rpc_public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_uses_wire_field_name() {
        let node: BackendNode = serde_json::from_str(r#"{"rpcPublicKey":"ab12"}"#).unwrap();
        assert_eq!(node.key(), "ab12");

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["rpcPublicKey"], "ab12");
    }
}
