//! HTTP handlers.
//!
//! Handlers are thin: validate parameters, build the node payload, then run
//! a fan-out, usually through the response cache.

pub mod actions;
pub mod auth;
pub mod health;
pub mod logs;
pub mod things;

use std::collections::HashMap;

use fleetgate_core::{Filter, RpcError};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, ValidationError};
use crate::server::AppState;

/// Query parameter that bypasses the response cache.
pub const OVERWRITE_CACHE: &str = "overwriteCache";

const INTEGER_PARAMS: [&str; 6] = ["start", "end", "offset", "limit", "startExcl", "endExcl"];
const BOOLEAN_PARAMS: [&str; 3] = ["mergeSitesData", "applyAggrCrossthg", "groupBatch"];

/// Raw query string parameters.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(transparent)]
pub struct Params(HashMap<String, String>);

impl Params {
    /// The parameter's raw value; empty values count as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn require(&self, name: &'static str) -> Result<&str, ValidationError> {
        self.get(name).ok_or(ValidationError::Required(name))
    }

    pub fn overwrite_cache(&self) -> bool {
        matches!(self.get(OVERWRITE_CACHE), Some("true" | "1"))
    }

    /// Parses the parameter as JSON, failing with `err` if it is not.
    pub fn json(&self, name: &str, err: ValidationError) -> Result<Option<Value>, ValidationError> {
        self.get(name)
            .map(|raw| serde_json::from_str(raw).map_err(|_| err))
            .transpose()
    }

    /// Like [`Params::json`], additionally requiring an array.
    pub fn json_array(
        &self,
        name: &str,
        invalid_json: ValidationError,
        not_array: ValidationError,
    ) -> Result<Option<Value>, ValidationError> {
        match self.json(name, invalid_json)? {
            Some(value) if !value.is_array() => Err(not_array),
            other => Ok(other),
        }
    }

    /// Parses `query` into a filter document.
    pub fn filter(&self) -> Result<Option<Filter>, ValidationError> {
        self.json("query", ValidationError::QueryInvalidJson)?
            .map(|doc| Filter::try_from(doc).map_err(ValidationError::QueryInvalid))
            .transpose()
    }

    /// The subset of parameters named in `names`.
    pub fn only(&self, names: &[&str]) -> Params {
        Params(
            self.0
                .iter()
                .filter(|(name, _)| names.contains(&name.as_str()))
                .map(|(name, raw)| (name.clone(), raw.clone()))
                .collect(),
        )
    }

    /// Response cache key: the endpoint tag followed by each named parameter.
    ///
    /// Cached routes forward exactly `names` upstream, so the key covers the
    /// whole node payload.
    pub fn cache_key<'a>(&'a self, tag: &'a str, names: &[&str]) -> Vec<Option<&'a str>> {
        std::iter::once(Some(tag))
            .chain(names.iter().map(|name| self.get(name)))
            .collect()
    }

    /// All parameters as a node payload, without gateway-only ones.
    ///
    /// Numeric and flag parameters are typed; everything else stays a string.
    pub fn payload(&self) -> Result<Map<String, Value>, ValidationError> {
        let mut payload = Map::new();
        for (name, raw) in &self.0 {
            if name == OVERWRITE_CACHE || name == "token" {
                continue;
            }
            let value = if let Some(param) = INTEGER_PARAMS.iter().find(|p| **p == name.as_str()) {
                raw.parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| ValidationError::Invalid(*param))?
            } else if let Some(param) = BOOLEAN_PARAMS.iter().find(|p| **p == name.as_str()) {
                raw.parse::<bool>()
                    .map(Value::from)
                    .map_err(|_| ValidationError::Invalid(*param))?
            } else {
                Value::String(raw.clone())
            };
            payload.insert(name.clone(), value);
        }
        Ok(payload)
    }
}

/// Splits a `1,2,3` id list.
pub fn split_ids(raw: Option<&str>) -> Result<Vec<String>, ValidationError> {
    let raw = raw.ok_or(ValidationError::IdsRequired)?;
    let ids: Vec<String> = raw.split(',').map(str::to_string).collect();
    if ids
        .iter()
        .any(|id| id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(ValidationError::IdsInvalid);
    }
    Ok(ids)
}

/// Fail-fast fan-out through the response cache.
pub async fn cached_map(
    state: &AppState,
    endpoint: &'static str,
    key: &[Option<&str>],
    overwrite: bool,
    method: &'static str,
    payload: Value,
) -> Result<Value, ApiError> {
    let fanout = state.fanout.clone();
    state
        .cache
        .get(key, endpoint, overwrite, move || async move {
            Ok(Value::Array(fanout.fanout_map(method, &payload).await?))
        })
        .await
}

/// Failure-isolating fan-out through the response cache.
pub async fn cached_each<R>(
    state: &AppState,
    endpoint: &'static str,
    key: &[Option<&str>],
    overwrite: bool,
    method: &'static str,
    payload: Value,
    reducer: R,
) -> Result<Value, ApiError>
where
    R: FnMut(&mut Vec<Value>, Result<Value, RpcError>) + Send + 'static,
{
    let fanout = state.fanout.clone();
    state
        .cache
        .get(key, endpoint, overwrite, move || async move {
            Ok(Value::Array(
                fanout.fanout_each_with(method, &payload, reducer).await,
            ))
        })
        .await
}

/// `{success: result}` per node, or `{error}` for a failed node.
pub fn wrap_success(acc: &mut Vec<Value>, outcome: Result<Value, RpcError>) {
    acc.push(match outcome {
        Ok(res) => serde_json::json!({ "success": res }),
        Err(e) => crate::rpc::isolated_entry(&e),
    });
}
