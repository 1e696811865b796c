//! Authentication and authorization error types.

/// Errors raised while authenticating a request or checking its permissions.
///
/// Every variant maps to a stable machine-readable code (see [`AuthError::code`])
/// which is what clients see. The human-readable text of
/// [`AuthError::IdentityProvider`] is only ever logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No bearer token was supplied.
    #[error("Missing or invalid Authorization header")]
    MissingToken,

    /// The token is unknown, expired, or could not be resolved.
    #[error("Authentication failed")]
    AuthFailed,

    /// The identity is valid but lacks a required capability.
    #[error("Authentication failed")]
    NoPermissions,

    /// The operation mutates fleet state and the identity has no write flag.
    #[error("Write permission required")]
    WritePermRequired,

    /// Neither a forwarded address nor a peer address was available.
    #[error("Unable to resolve client address")]
    IpResolveFailed,

    /// The identity collaborator failed.
    #[error("Identity provider error: {message}")]
    IdentityProvider {
        /// Description of the failure.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `IdentityProvider` error.
    #[must_use]
    pub fn identity_provider(message: impl Into<String>) -> Self {
        Self::IdentityProvider {
            message: message.into(),
        }
    }

    /// Stable code sent in the `message` field of error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken | Self::AuthFailed => "ERR_AUTH_FAIL",
            Self::NoPermissions => "ERR_AUTH_FAIL_NO_PERMS",
            Self::WritePermRequired => "ERR_WRITE_PERM_REQUIRED",
            Self::IpResolveFailed => "ERR_IP_RESOLVE_FAIL",
            Self::IdentityProvider { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Returns `true` if the request itself was at fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::IdentityProvider { .. })
    }
}
