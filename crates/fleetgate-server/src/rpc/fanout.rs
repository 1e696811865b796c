//! Bounded-concurrency fan-out of one call to every backend node.
//!
//! Two policies are offered. [`RpcFanout::fanout_each`] isolates failures:
//! every node contributes an entry, a failing node contributes an in-band
//! `{ "error": ... }` entry instead of aborting the request.
//! [`RpcFanout::fanout_map`] is fail-fast: the first node error aborts the
//! whole call and no further nodes are contacted.
//!
//! Both keep results in configured node order and never have more than
//! `concurrency_limit` calls outstanding.

use std::sync::Arc;
use std::time::Duration;

use fleetgate_core::{BackendNode, RpcError, RpcOptions, RpcTransport};
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};

use crate::metrics;

/// In-band entry a failed node contributes to an isolated fan-out.
pub fn isolated_entry(err: &RpcError) -> Value {
    json!({ "error": err.to_string() })
}

/// Default reducer: the node's result, or its in-band error entry.
pub fn push_isolated(acc: &mut Vec<Value>, outcome: Result<Value, RpcError>) {
    acc.push(match outcome {
        Ok(value) => value,
        Err(e) => isolated_entry(&e),
    });
}

#[derive(Clone)]
pub struct RpcFanout {
    transport: Arc<dyn RpcTransport>,
    nodes: Arc<[BackendNode]>,
    opts: RpcOptions,
    concurrency_limit: usize,
}

impl RpcFanout {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        nodes: Vec<BackendNode>,
        timeout: Duration,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            transport,
            nodes: nodes.into(),
            opts: RpcOptions::with_timeout(timeout),
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    pub fn nodes(&self) -> &[BackendNode] {
        &self.nodes
    }

    async fn call_node(
        &self,
        node: &BackendNode,
        method: &str,
        payload: &Value,
    ) -> Result<Value, RpcError> {
        metrics::record_rpc_call(method);
        let call = self.transport.request(node.key(), method, payload, self.opts);
        let outcome = match tokio::time::timeout(self.opts.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout),
        };

        if let Err(e) = &outcome {
            metrics::record_rpc_node_failure(method);
            tracing::warn!(node = node.key(), method, error = %e, "Node call failed");
        }
        outcome
    }

    /// Calls every node, isolating failures with [`push_isolated`].
    pub async fn fanout_each(&self, method: &str, payload: &Value) -> Vec<Value> {
        self.fanout_each_with(method, payload, push_isolated).await
    }

    /// Calls every node and folds each outcome into the result, in node order.
    ///
    /// The reducer sees each node's result or error exactly once and decides
    /// what, if anything, to append.
    pub async fn fanout_each_with<R>(&self, method: &str, payload: &Value, mut reducer: R) -> Vec<Value>
    where
        R: FnMut(&mut Vec<Value>, Result<Value, RpcError>),
    {
        let mut acc = Vec::with_capacity(self.nodes.len());
        let calls: Vec<_> = self
            .nodes
            .iter()
            .map(|node| self.call_node(node, method, payload))
            .collect();
        let mut outcomes = stream::iter(calls).buffered(self.concurrency_limit);

        while let Some(outcome) = outcomes.next().await {
            reducer(&mut acc, outcome);
        }
        acc
    }

    /// Calls every node; any node error aborts the whole call.
    ///
    /// Nodes not yet contacted when the first error arrives are never called,
    /// and in-flight calls are dropped.
    pub async fn fanout_map(&self, method: &str, payload: &Value) -> Result<Vec<Value>, RpcError> {
        let mut slots: Vec<Option<Value>> = vec![None; self.nodes.len()];
        let calls: Vec<_> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| async move { (idx, self.call_node(node, method, payload).await) })
            .collect();
        let mut outcomes = stream::iter(calls).buffer_unordered(self.concurrency_limit);

        while let Some((idx, outcome)) = outcomes.next().await {
            slots[idx] = Some(outcome?);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}
