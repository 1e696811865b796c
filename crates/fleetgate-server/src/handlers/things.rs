//! Thing, rack, settings and comment routes.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use fleetgate_auth::{AuthError, Authenticated};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Params, cached_map, wrap_success};
use crate::error::{ApiError, ValidationError};
use crate::server::AppState;

pub const LIST_THINGS: &str = "/auth/list-things";
pub const LIST_RACKS: &str = "/auth/list-racks";
pub const WORKER_CONFIG: &str = "/auth/worker-config";

const LIST_THINGS_PARAMS: [&str; 6] = ["query", "status", "offset", "limit", "fields", "sort"];
const LIST_RACKS_PARAMS: [&str; 1] = ["type"];
const WORKER_CONFIG_PARAMS: [&str; 2] = ["fields", "type"];

/// Permission needed to add, edit or delete comments.
pub const COMMENT_PERMISSION: &str = "comments:w";

pub async fn list_things(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    let mut payload = params.only(&LIST_THINGS_PARAMS).payload()?;
    if let Some(filter) = params.filter()? {
        payload.insert("query".into(), filter.to_value());
    }
    if let Some(sort) = params.json("sort", ValidationError::SortInvalidJson)? {
        payload.insert("sort".into(), sort);
    }
    if let Some(fields) = params.json("fields", ValidationError::FieldsInvalidJson)? {
        payload.insert("fields".into(), fields);
    }

    let key = params.cache_key("list-things", &LIST_THINGS_PARAMS);
    cached_map(
        &state,
        LIST_THINGS,
        &key,
        params.overwrite_cache(),
        "listThings",
        Value::Object(payload),
    )
    .await
    .map(Json)
}

pub async fn list_racks(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.get("type").ok_or(ValidationError::TypeInvalid)?;
    if params.get("keys").is_some() {
        return Err(ValidationError::KeysNotAllowed.into());
    }

    let key = params.cache_key("list-racks", &LIST_RACKS_PARAMS);
    cached_map(
        &state,
        LIST_RACKS,
        &key,
        params.overwrite_cache(),
        "listRacks",
        Value::Object(params.only(&LIST_RACKS_PARAMS).payload()?),
    )
    .await
    .map(Json)
}

pub async fn worker_config(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.require("type")?;
    let mut payload = params.only(&WORKER_CONFIG_PARAMS).payload()?;
    if let Some(fields) = params.json("fields", ValidationError::FieldsInvalidJson)? {
        payload.insert("fields".into(), fields);
    }

    let key = params.cache_key("worker-config", &WORKER_CONFIG_PARAMS);
    cached_map(
        &state,
        WORKER_CONFIG,
        &key,
        params.overwrite_cache(),
        "getWrkConf",
        Value::Object(payload),
    )
    .await
    .map(Json)
}

pub async fn thing_config(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.require("type")?;
    params.require("requestType")?;

    let payload = Value::Object(params.payload()?);
    let results = state.fanout.fanout_map("getThingConf", &payload).await?;
    Ok(Json(Value::Array(results)))
}

pub async fn get_settings(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    let rack_id = params.require("rackId")?;
    let payload = json!({ "rackId": rack_id });

    let results = state
        .fanout
        .fanout_each_with("getWrkSettings", &payload, wrap_success)
        .await;
    Ok(Json(Value::Array(results)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSettingsBody {
    pub rack_id: String,
    pub entries: Map<String, Value>,
}

pub async fn save_settings(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<SaveSettingsBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    state.auth.require_write(&ctx).await?;
    let Json(body) = body?;
    if body.entries.is_empty() {
        return Err(ValidationError::Invalid("entries").into());
    }

    let payload = json!({ "rackId": body.rack_id, "entries": body.entries });
    let results = state
        .fanout
        .fanout_each_with("saveWrkSettings", &payload, wrap_success)
        .await;
    Ok(Json(Value::Array(results)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    Add,
    Edit,
    Delete,
}

impl CommentAction {
    pub fn method(self) -> &'static str {
        match self {
            Self::Add => "saveThingComment",
            Self::Edit => "editThingComment",
            Self::Delete => "deleteThingComment",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentBody {
    pub id: Option<String>,
    pub rack_id: String,
    pub thing_id: String,
    pub pos: Option<Value>,
    pub ts: Option<f64>,
    pub comment: Option<String>,
}

async fn process_comment(
    state: &AppState,
    ctx: &fleetgate_auth::AuthContext,
    action: CommentAction,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if !state
        .auth
        .check_perms(ctx, false, &[COMMENT_PERMISSION], false)
        .await?
    {
        return Err(AuthError::WritePermRequired.into());
    }
    let Json(body) = body?;
    if body.rack_id.is_empty() || body.thing_id.is_empty() {
        return Err(ValidationError::BodyInvalid.into());
    }
    let has_comment = body.comment.as_deref().is_some_and(|c| !c.is_empty());
    if action != CommentAction::Delete && !has_comment {
        return Err(ValidationError::Required("comment").into());
    }

    let payload = json!({
        "id": body.id,
        "rackId": body.rack_id,
        "thingId": body.thing_id,
        "pos": body.pos,
        "ts": body.ts,
        "comment": body.comment,
        "user": ctx.email(),
    });
    let results = state
        .fanout
        .fanout_each_with(action.method(), &payload, wrap_success)
        .await;
    Ok(Json(Value::Array(results)))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    process_comment(&state, &ctx, CommentAction::Add, body).await
}

pub async fn edit_comment(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    process_comment(&state, &ctx, CommentAction::Edit, body).await
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    process_comment(&state, &ctx, CommentAction::Delete, body).await
}
