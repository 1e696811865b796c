//! Token resolution with a short-lived identity cache.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{IdentityCache, cache_key};
use crate::error::AuthError;
use crate::identity::{IdentityProvider, ResolveOptions, ResolvedIdentity};

/// Authentication context attached to a request.
///
/// `identity` is `None` only when authentication is disabled.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: Option<String>,
    pub identity: Option<Arc<ResolvedIdentity>>,
    pub ips: Vec<String>,
}

impl AuthContext {
    pub fn anonymous(ips: Vec<String>) -> Self {
        Self {
            token: None,
            identity: None,
            ips,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn email(&self) -> Option<&str> {
        self.identity.as_deref().map(|id| id.metadata.email.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_deref().map(|id| id.user_id.as_str())
    }
}

/// Turns an opaque token plus client addresses into a resolved identity.
pub struct TokenResolver {
    provider: Arc<dyn IdentityProvider>,
    cache: Arc<IdentityCache>,
    identity_ttl: Duration,
    enabled: bool,
}

impl TokenResolver {
    /// `identity_ttl` is the lifetime the provider grants its tokens.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        cache: Arc<IdentityCache>,
        identity_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            identity_ttl,
            enabled: true,
        }
    }

    /// Skip resolution entirely; every request is anonymous.
    #[must_use]
    pub fn with_auth_disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Cached identities are only served when they cannot outlive the token.
    pub fn cache_usable(&self) -> bool {
        self.cache.ttl() < self.identity_ttl
    }

    /// Resolve `token` presented from `ips`.
    ///
    /// Every failure, including provider errors, surfaces as
    /// [`AuthError::AuthFailed`] (or [`AuthError::MissingToken`]).
    pub async fn resolve(
        &self,
        token: Option<&str>,
        ips: &[String],
    ) -> Result<AuthContext, AuthError> {
        if !self.enabled {
            return Ok(AuthContext::anonymous(ips.to_vec()));
        }

        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        let key = cache_key(token, ips);
        let use_cache = self.cache_usable();

        if use_cache {
            if let Some(identity) = self.cache.get(&key) {
                return Ok(self.context(token, identity, ips));
            }
        }

        let resolved = self
            .provider
            .resolve_token(
                token,
                ips,
                ResolveOptions {
                    update_last_active: true,
                },
            )
            .await;

        let identity = match resolved {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                tracing::debug!("Token did not resolve to an identity");
                return Err(AuthError::AuthFailed);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Identity resolution failed");
                return Err(AuthError::AuthFailed);
            }
        };

        let identity = if use_cache {
            self.cache.insert(key, identity)
        } else {
            Arc::new(identity)
        };

        Ok(self.context(token, identity, ips))
    }

    fn context(&self, token: &str, identity: Arc<ResolvedIdentity>, ips: &[String]) -> AuthContext {
        AuthContext {
            token: Some(token.to_string()),
            identity: Some(identity),
            ips: ips.to_vec(),
        }
    }
}
