//! Telemetry log routes.

use axum::{
    Json,
    extract::{Query, State},
};
use fleetgate_auth::Authenticated;
use serde_json::{Map, Value};

use super::{Params, cached_each, cached_map};
use crate::error::{ApiError, ValidationError};
use crate::rpc::push_isolated;
use crate::server::AppState;

pub const TAIL_LOG: &str = "/auth/tail-log";
pub const TAIL_LOG_MULTI: &str = "/auth/tail-log/multi";
pub const TAIL_LOG_RANGE_AGGR: &str = "/auth/tail-log/range-aggr";
pub const HISTORY_LOG: &str = "/auth/history-log";

/// Parses the aggregation parameters shared by the tail-log routes.
fn aggregation(params: &Params, payload: &mut Map<String, Value>) -> Result<(), ValidationError> {
    if let Some(fields) = params.json("fields", ValidationError::FieldsInvalidJson)? {
        payload.insert("fields".into(), fields);
    }
    if let Some(aggr_fields) = params.json("aggrFields", ValidationError::AggrFieldsInvalidJson)? {
        payload.insert("aggrFields".into(), aggr_fields);
    }
    if let Some(aggr_times) = params.json_array(
        "aggrTimes",
        ValidationError::AggrTimesInvalidJson,
        ValidationError::AggrTimesInvalidArray,
    )? {
        payload.insert("aggrTimes".into(), aggr_times);
    }
    Ok(())
}

pub async fn tail_log(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.require("key")?;
    let mut payload = params.payload()?;
    aggregation(&params, &mut payload)?;

    let key = [
        Some("tail-log"),
        params.get("key"),
        params.get("type"),
        params.get("tag"),
        params.get("start"),
        params.get("end"),
        params.get("offset"),
        params.get("limit"),
        params.get("fields"),
        params.get("aggrFields"),
        params.get("aggrTimes"),
        params.get("mergeSitesData"),
        params.get("applyAggrCrossthg"),
    ];
    cached_map(
        &state,
        TAIL_LOG,
        &key,
        params.overwrite_cache(),
        "tailLog",
        Value::Object(payload),
    )
    .await
    .map(Json)
}

pub async fn tail_log_multi(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.require("keys")?;
    let mut payload = params.payload()?;
    if let Some(keys) = params.json_array(
        "keys",
        ValidationError::KeysInvalidJson,
        ValidationError::KeysInvalidArray,
    )? {
        payload.insert("keys".into(), keys);
    }
    aggregation(&params, &mut payload)?;

    let key = [
        Some("tail-log/multi"),
        params.get("keys"),
        params.get("start"),
        params.get("end"),
        params.get("offset"),
        params.get("limit"),
        params.get("fields"),
        params.get("aggrFields"),
        params.get("aggrTimes"),
    ];
    cached_map(
        &state,
        TAIL_LOG_MULTI,
        &key,
        params.overwrite_cache(),
        "tailLogMulti",
        Value::Object(payload),
    )
    .await
    .map(Json)
}

pub async fn tail_log_range_aggr(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    let keys = params.json("keys", ValidationError::KeysInvalidJson)?;
    let keys = match keys {
        Some(Value::Array(items)) if !items.is_empty() => Value::Array(items),
        Some(_) => return Err(ValidationError::KeysInvalidArray.into()),
        None => return Err(ValidationError::Required("keys").into()),
    };

    // Keyed on the normalized document, not the raw string.
    let canonical = keys.to_string();
    let mut payload = params.payload()?;
    payload.insert("keys".into(), keys);

    let key = [Some("tail-log/range-aggr"), Some(canonical.as_str())];
    cached_each(
        &state,
        TAIL_LOG_RANGE_AGGR,
        &key,
        params.overwrite_cache(),
        "tailLogCustomRangeAggr",
        Value::Object(payload),
        push_isolated,
    )
    .await
    .map(Json)
}

pub async fn history_log(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.require("logType")?;
    let mut payload = params.payload()?;
    if let Some(fields) = params.json("fields", ValidationError::FieldsInvalidJson)? {
        payload.insert("fields".into(), fields);
    }
    if let Some(filter) = params.filter()? {
        payload.insert("query".into(), filter.to_value());
    }

    let key = [
        Some("history-log"),
        params.get("start"),
        params.get("end"),
        params.get("offset"),
        params.get("limit"),
        params.get("startExcl"),
        params.get("endExcl"),
        params.get("tag"),
        params.get("logType"),
        params.get("fields"),
        params.get("query"),
    ];
    cached_map(
        &state,
        HISTORY_LOG,
        &key,
        params.overwrite_cache(),
        "getHistoricalLogs",
        Value::Object(payload),
    )
    .await
    .map(Json)
}
