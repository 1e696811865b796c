//! Shared harness: boots the real router on an ephemeral port against a
//! scripted fleet.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetgate_core::{BackendNode, RpcError, RpcOptions, RpcTransport};
use fleetgate_server::ServerBuilder;
use fleetgate_server::config::{AppConfig, SeedUser};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const ADMIN_TOKEN: &str = "admin-token";
pub const VIEWER_TOKEN: &str = "viewer-token";
pub const COMMENTER_TOKEN: &str = "commenter-token";
pub const ROOT_TOKEN: &str = "root-token";

type Script = dyn Fn(&str, &str, &Value) -> Result<Value, RpcError> + Send + Sync;

/// One recorded upstream call.
#[derive(Debug, Clone)]
pub struct Call {
    pub node: String,
    pub method: String,
    pub payload: Value,
}

/// Transport whose replies come from a closure of `(node, method, payload)`.
pub struct MockFleet {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl MockFleet {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &str, &Value) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every node answers `{"node": key}`.
    pub fn echo() -> Self {
        Self::new(|node, _, _| Ok(serde_json::json!({ "node": node })))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, method: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RpcTransport for MockFleet {
    async fn request(
        &self,
        node_key: &str,
        method: &str,
        payload: &Value,
        _opts: RpcOptions,
    ) -> Result<Value, RpcError> {
        self.calls.lock().push(Call {
            node: node_key.to_string(),
            method: method.to_string(),
            payload: payload.clone(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(node_key, method, payload)
    }
}

fn user(email: &str, roles: &[&str], token: &str) -> SeedUser {
    SeedUser {
        email: email.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        tokens: vec![token.to_string()],
    }
}

/// Two nodes and four seeded users of increasing privilege.
pub fn config(nodes: &[&str]) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.server.site = "site-test".into();
    cfg.rpc.nodes = nodes.iter().map(|key| BackendNode::new(*key)).collect();
    cfg.rpc.timeout_ms = 2_000;
    cfg.alerts.broadcast_interval_ms = 100;
    cfg.auth.super_admin_perms = vec!["actions:rw".into(), "things:rw".into()];
    cfg.auth.roles = HashMap::from([
        ("admin".to_string(), vec!["actions:rw".to_string(), "things:rw".to_string()]),
        ("viewer".to_string(), vec!["things:r".to_string()]),
        ("commenter".to_string(), vec!["comments:w".to_string()]),
    ]);
    cfg.auth.users = vec![
        user("admin@example.com", &["admin"], ADMIN_TOKEN),
        user("viewer@example.com", &["viewer"], VIEWER_TOKEN),
        user("commenter@example.com", &["commenter"], COMMENTER_TOKEN),
        user("root@example.com", &["*"], ROOT_TOKEN),
    ];
    cfg
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(cfg: AppConfig, fleet: Arc<MockFleet>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ServerBuilder::new()
            .with_config(cfg)
            .with_transport(fleet)
            .build()
            .unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            client: reqwest::Client::new(),
            shutdown: Some(tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn get(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(token)
    }

    pub async fn get_json(&self, path: &str, token: &str) -> (u16, Value) {
        let res = self.get(path, token).send().await.unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
