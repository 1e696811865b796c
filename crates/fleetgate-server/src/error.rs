//! Gateway error types.

use std::fmt;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleetgate_auth::AuthError;
use fleetgate_auth::middleware::error_body;
use fleetgate_core::{FilterError, RpcError};

/// A malformed request parameter. Each offending field has its own code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    QueryInvalidJson,
    /// `query` parsed as JSON but is not a valid filter.
    QueryInvalid(FilterError),
    SortInvalidJson,
    FieldsInvalidJson,
    AggrFieldsInvalidJson,
    AggrTimesInvalidJson,
    AggrTimesInvalidArray,
    KeysInvalidJson,
    KeysInvalidArray,
    QueriesInvalidJson,
    TypeInvalid,
    KeysNotAllowed,
    BatchActionsPayloadInvalidArray,
    IdsRequired,
    IdsInvalid,
    /// A required parameter is absent.
    Required(&'static str),
    /// A parameter has the wrong type.
    Invalid(&'static str),
    BodyInvalid,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueryInvalidJson => "ERR_QUERY_INVALID_JSON",
            Self::QueryInvalid(_) => "ERR_QUERY_INVALID",
            Self::SortInvalidJson => "ERR_SORT_INVALID_JSON",
            Self::FieldsInvalidJson => "ERR_FIELDS_INVALID_JSON",
            Self::AggrFieldsInvalidJson => "ERR_AGGRFIELDS_INVALID_JSON",
            Self::AggrTimesInvalidJson => "ERR_AGGRTIMES_INVALID_JSON",
            Self::AggrTimesInvalidArray => "ERR_AGGRTIMES_INVALID_ARRAY",
            Self::KeysInvalidJson => "ERR_KEYS_INVALID_JSON",
            Self::KeysInvalidArray => "ERR_KEYS_INVALID_ARRAY",
            Self::QueriesInvalidJson => "ERR_QUERIES_INVALID_JSON",
            Self::TypeInvalid => "ERR_TYPE_INVALID",
            Self::KeysNotAllowed => "ERR_KEYS_NOT_ALLOWED",
            Self::BatchActionsPayloadInvalidArray => "ERR_BATCH_ACTIONS_PAYLOAD_INVALID_ARRAY",
            Self::IdsRequired => "ERR_IDS_REQUIRED",
            Self::IdsInvalid => "ERR_IDS_INVALID",
            Self::Required(_) => "ERR_PARAM_REQUIRED",
            Self::Invalid(_) => "ERR_PARAM_INVALID",
            Self::BodyInvalid => "ERR_BODY_INVALID",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryInvalid(e) => write!(f, "{}: {e}", self.code()),
            Self::Required(param) | Self::Invalid(param) => write!(f, "{}: {param}", self.code()),
            other => f.write_str(other.code()),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors returned by gateway handlers.
///
/// `Clone` so a single in-flight failure can be handed to every coalesced
/// caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A fail-fast fan-out aborted on a node error.
    #[error("upstream call failed: {0}")]
    Rpc(#[from] RpcError),

    /// An endpoint resolved to a cache bucket that has no store.
    #[error("no cache bucket {bucket:?} for endpoint {endpoint}")]
    CacheMisconfigured { endpoint: String, bucket: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(e) => e.status(),
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Rpc(_) => StatusCode::BAD_GATEWAY,
            Self::CacheMisconfigured { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.code(),
            Self::Validation(e) => e.code(),
            Self::Rpc(_) => "ERR_RPC_FAILED",
            Self::CacheMisconfigured { .. } | Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "Rejected request body");
        Self::Validation(ValidationError::BodyInvalid)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            Self::Auth(e) => return e.clone().into_response(),
            Self::Validation(e) => e.to_string(),
            Self::Rpc(e) => {
                tracing::warn!(error = %e, "Fan-out aborted");
                status.canonical_reason().unwrap_or("Bad Gateway").to_string()
            }
            Self::CacheMisconfigured { .. } | Self::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                status
                    .canonical_reason()
                    .unwrap_or("Internal Server Error")
                    .to_string()
            }
        };

        (status, Json(error_body(status, &error, self.code()))).into_response()
    }
}
