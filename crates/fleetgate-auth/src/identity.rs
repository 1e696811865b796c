//! Identity collaborator contract and the types it exchanges.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Default lifetime of a regenerated token, in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 300;
/// Default prefix of a regenerated token.
pub const DEFAULT_TOKEN_PREFIX: &str = "pub";
/// Default scope of a regenerated token.
pub const DEFAULT_TOKEN_SCOPE: &str = "api";

/// The identity a token resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub user_id: String,
    pub metadata: IdentityMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    pub email: String,
    /// Role names, JSON-encoded as a single string.
    pub roles: String,
}

impl IdentityMetadata {
    pub fn new(email: impl Into<String>, roles: &[String]) -> Self {
        Self {
            email: email.into(),
            roles: serde_json::to_string(roles).unwrap_or_else(|_| "[]".to_string()),
        }
    }

    /// Decoded role names. Malformed role strings decode to no roles.
    pub fn role_names(&self) -> Vec<String> {
        serde_json::from_str(&self.roles).unwrap_or_default()
    }
}

/// Raw permission data held by a token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPermissions {
    pub superadmin: bool,
    pub perms: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub update_last_active: bool,
}

/// Parameters for issuing a replacement token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerateTokenRequest {
    pub old_token: String,
    pub ips: Vec<String>,
    pub ttl_secs: u64,
    pub prefix: String,
    pub scope: String,
    /// Roles to narrow the new token to. Empty keeps the old token's roles.
    pub roles: Vec<String>,
}

impl RegenerateTokenRequest {
    pub fn new(old_token: impl Into<String>, ips: Vec<String>) -> Self {
        Self {
            old_token: old_token.into(),
            ips,
            ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            scope: DEFAULT_TOKEN_SCOPE.to_string(),
            roles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// External identity collaborator.
///
/// Implementations own token issuance and the user/role store. The gateway
/// only reads from it, apart from [`regenerate_token`](Self::regenerate_token)
/// and the periodic [`cleanup_tokens`](Self::cleanup_tokens).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve `token` presented from `ips`. `Ok(None)` means the token is
    /// unknown or no longer valid.
    async fn resolve_token(
        &self,
        token: &str,
        ips: &[String],
        opts: ResolveOptions,
    ) -> Result<Option<ResolvedIdentity>, AuthError>;

    /// Superadmin flag and raw permission strings of `token`.
    async fn token_perms(&self, token: &str) -> Result<TokenPermissions, AuthError>;

    /// Whether `token` is granted the single permission `perm` (`resource:level`).
    async fn token_has_perm(&self, token: &str, perm: &str) -> Result<bool, AuthError>;

    /// Issue a new token derived from `req.old_token`.
    async fn regenerate_token(&self, req: RegenerateTokenRequest) -> Result<String, AuthError>;

    /// Drop expired tokens. Returns how many were removed.
    async fn cleanup_tokens(&self) -> Result<usize, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_json_encoded() {
        let meta = IdentityMetadata::new("a@b.c", &["admin".to_string(), "read".to_string()]);
        assert_eq!(meta.roles, r#"["admin","read"]"#);
        assert_eq!(meta.role_names(), vec!["admin", "read"]);
    }

    #[test]
    fn test_identity_wire_shape() {
        let identity = ResolvedIdentity {
            user_id: "u1".into(),
            metadata: IdentityMetadata::new("a@b.c", &[]),
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["metadata"]["email"], "a@b.c");
        assert_eq!(json["metadata"]["roles"], "[]");
    }

    #[test]
    fn test_regenerate_defaults() {
        let req = RegenerateTokenRequest::new("old", vec![]);
        assert_eq!(req.ttl_secs, 300);
        assert_eq!(req.prefix, "pub");
        assert_eq!(req.scope, "api");
        assert!(req.roles.is_empty());
    }
}
