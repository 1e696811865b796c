//! Error responses for authentication failures.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::error::AuthError;

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::AuthFailed | Self::NoPermissions | Self::WritePermRequired => {
                StatusCode::UNAUTHORIZED
            }
            Self::IpResolveFailed => StatusCode::BAD_REQUEST,
            Self::IdentityProvider { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Gateway error body: `{ statusCode, error, message }`.
pub fn error_body(status: StatusCode, error: &str, code: &str) -> Value {
    json!({
        "statusCode": status.as_u16(),
        "error": error,
        "message": code,
    })
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            // Provider detail stays in the logs.
            Self::IdentityProvider { message } => {
                tracing::error!(error = %message, "Identity provider failure");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(error_body(status, &error, self.code()))).into_response()
    }
}
