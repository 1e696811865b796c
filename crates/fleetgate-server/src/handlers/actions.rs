//! Action query and voting routes.
//!
//! Mutating routes require the write flag and attach the caller's email as
//! `voter` plus their permissions, so nodes can run their own vote policy.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use fleetgate_auth::Authenticated;
use fleetgate_core::RpcError;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Params, cached_each, split_ids};
use crate::error::{ApiError, ValidationError};
use crate::rpc::push_isolated;
use crate::server::AppState;

pub const ACTIONS: &str = "/auth/actions";
pub const ACTIONS_BATCH: &str = "/auth/actions/batch";
pub const ACTIONS_SINGLE: &str = "/auth/actions/{type}/{id}";

/// Flattens each node's action list; failed nodes are only logged.
fn extend_actions(acc: &mut Vec<Value>, outcome: Result<Value, RpcError>) {
    match outcome {
        Ok(Value::Array(items)) => acc.extend(items),
        Ok(other) => acc.push(other),
        Err(_) => {}
    }
}

/// A failed push still yields one entry per node.
fn push_or_errors(acc: &mut Vec<Value>, outcome: Result<Value, RpcError>) {
    acc.push(match outcome {
        Ok(res) => res,
        Err(e) => json!({ "id": null, "errors": [e.to_string()] }),
    });
}

fn wrap_res(acc: &mut Vec<Value>, outcome: Result<Value, RpcError>) {
    acc.push(match outcome {
        Ok(res) => json!({ "res": res }),
        Err(e) => json!({ "res": { "success": false, "error": e.to_string() } }),
    });
}

pub async fn query_actions(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.require("queries")?;
    let mut payload = Map::new();
    if let Some(queries) = params.json("queries", ValidationError::QueriesInvalidJson)? {
        payload.insert("queries".into(), queries);
    }
    if let Some(group_batch) = params.payload()?.remove("groupBatch") {
        payload.insert("groupBatch".into(), group_batch);
    }
    if let Some(suffix) = params.get("suffix") {
        payload.insert("suffix".into(), Value::from(suffix));
    }

    let key = [Some("actions"), params.get("queries"), params.get("groupBatch")];
    cached_each(
        &state,
        ACTIONS,
        &key,
        params.overwrite_cache(),
        "queryActions",
        Value::Object(payload),
        push_isolated,
    )
    .await
    .map(Json)
}

pub async fn actions_batch(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    let ids = split_ids(params.get("ids"))?;

    let key = [Some("actions/batch"), params.get("ids")];
    cached_each(
        &state,
        ACTIONS_BATCH,
        &key,
        params.overwrite_cache(),
        "getActionsBatch",
        json!({ "ids": ids }),
        extend_actions,
    )
    .await
    .map(Json)
}

pub async fn get_action(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Path((action_type, id)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    let id: i64 = id.parse().map_err(|_| ValidationError::Invalid("id"))?;
    let id_part = id.to_string();

    let key = [Some("actions/:type/:id"), Some(action_type.as_str()), Some(id_part.as_str())];
    cached_each(
        &state,
        ACTIONS_SINGLE,
        &key,
        params.overwrite_cache(),
        "getAction",
        json!({ "id": id, "type": action_type }),
        push_isolated,
    )
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
pub struct PushActionBody {
    pub query: Map<String, Value>,
    pub action: String,
    pub params: Vec<Value>,
}

pub async fn push_action(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<PushActionBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let perms = state.auth.require_write(&ctx).await?;
    let Json(body) = body?;

    let payload = json!({
        "query": body.query,
        "action": body.action,
        "params": body.params,
        "voter": ctx.email(),
        "authPerms": perms.permissions,
    });
    let results = state
        .fanout
        .fanout_each_with("pushAction", &payload, push_or_errors)
        .await;
    Ok(Json(Value::Array(results)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushBatchBody {
    pub batch_actions_payload: Value,
    #[serde(rename = "batchActionUID")]
    pub batch_action_uid: String,
    pub suffix: Option<String>,
}

pub async fn push_actions_batch(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<PushBatchBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let perms = state.auth.require_write(&ctx).await?;
    let Json(body) = body?;
    if !body.batch_actions_payload.is_array() {
        return Err(ValidationError::BatchActionsPayloadInvalidArray.into());
    }

    let payload = json!({
        "batchActionsPayload": body.batch_actions_payload,
        "batchActionUID": body.batch_action_uid,
        "suffix": body.suffix,
        "voter": ctx.email(),
        "authPerms": perms.permissions,
    });
    let results = state
        .fanout
        .fanout_each_with("pushActionsBatch", &payload, push_or_errors)
        .await;
    Ok(Json(Value::Array(results)))
}

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub approve: bool,
}

pub async fn vote_action(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(id): Path<String>,
    body: Result<Json<VoteBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let perms = state.auth.require_write(&ctx).await?;
    let id: i64 = id.parse().map_err(|_| ValidationError::Invalid("id"))?;
    let Json(body) = body?;

    let payload = json!({
        "id": id,
        "approve": body.approve,
        "voter": ctx.email(),
        "authPerms": perms.caps,
    });
    let results = state
        .fanout
        .fanout_each_with("voteAction", &payload, wrap_res)
        .await;
    Ok(Json(Value::Array(results)))
}

pub async fn cancel_actions(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    state.auth.require_write(&ctx).await?;
    let ids = split_ids(params.get("ids"))?;

    let payload = json!({ "ids": ids, "voter": ctx.email() });
    let results = state
        .fanout
        .fanout_each_with("cancelActionsBatch", &payload, wrap_res)
        .await;
    Ok(Json(Value::Array(results)))
}
