//! Caller identity, token and permission routes.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use fleetgate_auth::{AuthError, Authenticated, RegenerateTokenRequest};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Params, cached_map};
use crate::error::ApiError;
use crate::server::AppState;

pub const EXT_DATA: &str = "/auth/ext-data";

const EXT_DATA_PARAMS: [&str; 2] = ["type", "query"];

pub async fn userinfo(Authenticated(ctx): Authenticated) -> Json<Value> {
    Json(json!(ctx.identity.as_deref()))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub ips: Option<Vec<String>>,
    pub ttl: Option<u64>,
    pub pfx: Option<String>,
    pub scope: Option<String>,
    pub roles: Option<Vec<String>>,
}

/// Issues a token derived from the caller's own.
pub async fn new_token(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let old_token = ctx.token.clone().ok_or(AuthError::AuthFailed)?;
    let body = body_or_default(body)?;

    let mut req = RegenerateTokenRequest::new(old_token, body.ips.unwrap_or(ctx.ips))
        .with_ttl_secs(body.ttl.unwrap_or(state.config.auth.identity_ttl_secs));
    if let Some(pfx) = body.pfx {
        req = req.with_prefix(pfx);
    }
    if let Some(scope) = body.scope {
        req = req.with_scope(scope);
    }
    if let Some(roles) = body.roles {
        req = req.with_roles(roles);
    }

    let token = state.auth.resolver.provider().regenerate_token(req).await?;
    Ok(Json(json!({ "token": token })))
}

pub async fn permissions(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
) -> Result<Json<Value>, ApiError> {
    let permissions = state.auth.permissions(&ctx).await?;
    Ok(Json(json!({ "permissions": permissions })))
}

pub async fn site(State(state): State<AppState>, Authenticated(_): Authenticated) -> Json<Value> {
    Json(json!({ "site": state.config.server.site }))
}

pub async fn ext_data(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    params.require("type")?;
    let mut payload = params.only(&EXT_DATA_PARAMS).payload()?;
    if let Some(filter) = params.filter()? {
        payload.insert("query".into(), filter.to_value());
    }

    let key = params.cache_key("ext-data", &EXT_DATA_PARAMS);
    cached_map(
        &state,
        EXT_DATA,
        &key,
        params.overwrite_cache(),
        "getWrkExtData",
        Value::Object(payload),
    )
    .await
    .map(Json)
}

/// Maps a rejected optional body to a validation error.
pub(crate) fn body_or_default<T: Default>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    match body {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}
