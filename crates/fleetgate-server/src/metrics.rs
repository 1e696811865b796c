//! Prometheus metrics for the gateway.
//!
//! HTTP traffic, response cache effectiveness, upstream fan-out failures and
//! the alert socket population are exported under the names in [`names`].

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub mod names {
    // HTTP
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Response cache
    pub const REQUEST_CACHE_HITS_TOTAL: &str = "request_cache_hits_total";
    pub const REQUEST_CACHE_MISSES_TOTAL: &str = "request_cache_misses_total";
    pub const REQUEST_CACHE_COALESCED_TOTAL: &str = "request_cache_coalesced_total";

    // Upstream
    pub const RPC_CALLS_TOTAL: &str = "rpc_calls_total";
    pub const RPC_NODE_FAILURES_TOTAL: &str = "rpc_node_failures_total";

    // Alerts
    pub const WS_CLIENTS_CONNECTED: &str = "ws_clients_connected";
    pub const WS_CLIENTS_PRUNED_TOTAL: &str = "ws_clients_pruned_total";
    pub const ALERTS_BROADCAST_TOTAL: &str = "alerts_broadcast_total";

    // Identity
    pub const TOKENS_CLEANED_TOTAL: &str = "tokens_cleaned_total";
}

/// Installs the Prometheus recorder.
///
/// Returns `false` if it was already installed or installation failed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Prometheus text exposition, or `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };
    let path = normalize_path(path);

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.clone(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => path
    )
    .record(duration.as_secs_f64());
}

pub fn record_rpc_call(method: &str) {
    counter!(names::RPC_CALLS_TOTAL, "method" => method.to_string()).increment(1);
}

pub fn record_rpc_node_failure(method: &str) {
    counter!(names::RPC_NODE_FAILURES_TOTAL, "method" => method.to_string()).increment(1);
}

pub fn set_ws_clients(count: usize) {
    gauge!(names::WS_CLIENTS_CONNECTED).set(count as f64);
}

pub fn record_ws_pruned(count: usize) {
    counter!(names::WS_CLIENTS_PRUNED_TOTAL).increment(count as u64);
}

pub fn record_alerts_broadcast(recipients: usize) {
    counter!(names::ALERTS_BROADCAST_TOTAL).increment(recipients as u64);
}

pub fn record_tokens_cleaned(count: usize) {
    counter!(names::TOKENS_CLEANED_TOTAL).increment(count as u64);
}

/// Collapses path parameters so per-id routes share one series.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut out = Vec::with_capacity(segments.len());
    for (i, seg) in segments.iter().enumerate() {
        let prev = if i > 0 { segments[i - 1] } else { "" };
        let next = segments.get(i + 1).copied().unwrap_or("");
        if !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()) {
            out.push(":id");
        } else if prev == "actions" && !next.is_empty() && *seg != "voting" && *seg != "batch" {
            // /auth/actions/{type}/{id}
            out.push(":type");
        } else {
            out.push(seg);
        }
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/auth/list-things"), "/auth/list-things");
        assert_eq!(normalize_path("/auth/actions/reboot/42"), "/auth/actions/:type/:id");
        assert_eq!(normalize_path("/auth/actions/voting/7/vote"), "/auth/actions/voting/:id/vote");
        assert_eq!(normalize_path("/auth/actions/batch"), "/auth/actions/batch");
    }
}
