//! Alert aggregation and periodic broadcast.

use std::sync::Arc;
use std::time::Duration;

use fleetgate_core::{Filter, FilterError, FilterExpr, FilterOp, ThingQuery};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use super::registry::{ALERTS_CHANNEL, ClientRegistry};
use crate::config::AlertsConfig;
use crate::metrics;
use crate::rpc::RpcFanout;

/// Thing fields an alert record needs.
const ALERT_FIELDS: [&str; 5] = ["last.alerts", "info.container", "type", "id", "code"];

/// Query for active things carrying alerts.
///
/// With `fetch_all`, every alert counts; otherwise only alerts created at or
/// after `since_ms`.
pub fn alerts_query(fetch_all: bool, since_ms: i64, limit: u64) -> Result<ThingQuery, FilterError> {
    let recency = if fetch_all {
        FilterExpr::new("last.alerts.createdAt", FilterOp::Exists, Value::Bool(true))?
    } else {
        FilterExpr::new("last.alerts.createdAt", FilterOp::Gte, json!(since_ms))?
    };
    let filter = Filter::new()
        .with(FilterExpr::new("last.alerts", FilterOp::Ne, Value::Null)?)
        .with(recency);

    Ok(ThingQuery::new()
        .status(1)
        .filter(filter)
        .limit(limit)
        .select(ALERT_FIELDS))
}

/// One record per alert of every thing, tagged with the thing's identity.
///
/// The alert's own fields come first; `id`, `type`, `code` and `container`
/// from the owning thing overwrite them. Things without an alert list and
/// non-object alerts are skipped.
pub fn flatten_alerts(things: Vec<Value>) -> Vec<Value> {
    let mut records = Vec::new();
    for thing in things {
        let Some(alerts) = thing.pointer("/last/alerts").and_then(Value::as_array) else {
            continue;
        };
        for alert in alerts {
            let Value::Object(fields) = alert else {
                continue;
            };
            let mut record: Map<String, Value> = fields.clone();
            for key in ["id", "type", "code"] {
                record.insert(key.to_string(), thing.get(key).cloned().unwrap_or(Value::Null));
            }
            record.insert(
                "container".to_string(),
                thing.pointer("/info/container").cloned().unwrap_or(Value::Null),
            );
            records.push(Value::Object(record));
        }
    }
    records
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub struct AlertService {
    fanout: RpcFanout,
    registry: Arc<ClientRegistry>,
    recent_window: Duration,
    limit: u64,
}

impl AlertService {
    pub fn new(fanout: RpcFanout, registry: Arc<ClientRegistry>, config: &AlertsConfig) -> Self {
        Self {
            fanout,
            registry,
            recent_window: Duration::from_millis(config.recent_window_ms),
            limit: config.limit,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Current alerts across the fleet. Never fails: problems yield `[]`.
    pub async fn fetch_alerts(&self, fetch_all: bool) -> Vec<Value> {
        let since = now_ms() - self.recent_window.as_millis() as i64;
        let query = match alerts_query(fetch_all, since, self.limit) {
            Ok(query) => query,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build alerts query");
                return Vec::new();
            }
        };

        let things = self
            .fanout
            .fanout_each_with("listThings", &query.to_value(), |acc, outcome| {
                // Failed nodes are already logged by the fan-out.
                if let Ok(Value::Array(items)) = outcome {
                    acc.extend(items);
                }
            })
            .await;

        flatten_alerts(things)
    }

    /// Pushes recent alerts to every subscribed client.
    ///
    /// Alerts are fetched and serialized once per call. Returns the number of
    /// clients the payload was queued for.
    pub async fn broadcast(&self) -> usize {
        if self.registry.is_empty() {
            return 0;
        }

        let alerts = self.fetch_alerts(false).await;
        let payload: Arc<str> = match serde_json::to_string(&alerts) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize alerts");
                return 0;
            }
        };

        let delivered = self.registry.broadcast(ALERTS_CHANNEL, &payload);
        metrics::record_alerts_broadcast(delivered);
        delivered
    }
}
