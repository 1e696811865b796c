//! Request authentication extractors.
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use fleetgate_auth::middleware::{AuthState, Authenticated};
//!
//! async fn whoami(Authenticated(auth): Authenticated) -> String {
//!     auth.email().unwrap_or("anonymous").to_string()
//! }
//!
//! let app = Router::new()
//!     .route("/auth/userinfo", get(whoami))
//!     .with_state(auth_state);
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::error::AuthError;
use crate::permissions::{PermissionEvaluator, PermissionSet};
use crate::resolver::{AuthContext, TokenResolver};

use super::extract::{bearer_token, client_ips, query_token};

/// State required by the authentication extractors.
///
/// Include it in the application state and expose it through `FromRef`.
#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<TokenResolver>,
    pub evaluator: Arc<PermissionEvaluator>,
}

impl AuthState {
    pub fn new(resolver: Arc<TokenResolver>, evaluator: Arc<PermissionEvaluator>) -> Self {
        Self {
            resolver,
            evaluator,
        }
    }

    /// Resolve `token` for a request with the given headers and peer.
    pub async fn authenticate(
        &self,
        token: Option<String>,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Result<AuthContext, AuthError> {
        if !self.resolver.is_enabled() {
            let ips = client_ips(headers, peer).unwrap_or_default();
            return Ok(AuthContext::anonymous(ips));
        }

        let ips = client_ips(headers, peer)?;
        let ctx = self.resolver.resolve(token.as_deref(), &ips).await;
        if let Err(e) = &ctx {
            tracing::debug!(error = %e, "Request authentication failed");
        }
        ctx
    }

    /// Effective permissions of the caller.
    pub async fn permissions(&self, ctx: &AuthContext) -> Result<PermissionSet, AuthError> {
        if !self.resolver.is_enabled() {
            return Ok(self.evaluator.unrestricted());
        }
        let token = ctx.token.as_deref().ok_or(AuthError::AuthFailed)?;
        self.evaluator.permissions_of(token).await
    }

    /// Raw `has_perms` check for the caller.
    pub async fn check_perms(
        &self,
        ctx: &AuthContext,
        require_write: bool,
        perms: &[&str],
        match_all: bool,
    ) -> Result<bool, AuthError> {
        if !self.resolver.is_enabled() {
            return Ok(true);
        }
        let token = ctx.token.as_deref().ok_or(AuthError::AuthFailed)?;
        self.evaluator
            .has_perms(token, require_write, perms, match_all)
            .await
    }

    /// Route-level capability requirement: write flag plus any of `perms`.
    pub async fn require_perms(&self, ctx: &AuthContext, perms: &[&str]) -> Result<(), AuthError> {
        if self.check_perms(ctx, true, perms, false).await? {
            Ok(())
        } else {
            tracing::debug!(user = ?ctx.email(), ?perms, "Missing required permissions");
            Err(AuthError::NoPermissions)
        }
    }

    /// Permissions of a caller that must hold the write flag.
    pub async fn require_write(&self, ctx: &AuthContext) -> Result<PermissionSet, AuthError> {
        let perms = self.permissions(ctx).await?;
        if !perms.write {
            return Err(AuthError::WritePermRequired);
        }
        Ok(perms)
    }
}

fn peer_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

async fn authenticate_parts<S>(
    parts: &mut Parts,
    state: &S,
    token: Option<String>,
) -> Result<AuthContext, AuthError>
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    // Already authenticated by an outer layer.
    if let Some(ctx) = parts.extensions.get::<AuthContext>() {
        return Ok(ctx.clone());
    }

    let auth_state = AuthState::from_ref(state);
    let ctx = auth_state
        .authenticate(token, &parts.headers, peer_addr(parts))
        .await?;
    parts.extensions.insert(ctx.clone());
    Ok(ctx)
}

/// Extractor authenticating with an `Authorization: Bearer` header.
///
/// The resolved [`AuthContext`] is also stored in the request extensions.
pub struct Authenticated(pub AuthContext);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers);
        authenticate_parts(parts, state, token).await.map(Authenticated)
    }
}

/// Extractor authenticating with a `?token=` query parameter.
///
/// Browsers cannot set headers on a WebSocket handshake, so the upgrade route
/// uses this instead of [`Authenticated`].
pub struct QueryTokenAuth(pub AuthContext);

impl<S> FromRequestParts<S> for QueryTokenAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = query_token(&parts.uri);
        authenticate_parts(parts, state, token).await.map(QueryTokenAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdentityCache;
    use crate::memory::MemoryIdentityStore;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(store: Arc<MemoryIdentityStore>, enabled: bool) -> AuthState {
        let mut resolver = TokenResolver::new(
            store.clone(),
            Arc::new(IdentityCache::new(Duration::from_secs(60))),
            Duration::from_secs(300),
        );
        if !enabled {
            resolver = resolver.with_auth_disabled();
        }
        AuthState::new(
            Arc::new(resolver),
            Arc::new(PermissionEvaluator::new(store, vec!["actions:rw".into()])),
        )
    }

    fn store() -> Arc<MemoryIdentityStore> {
        let store = MemoryIdentityStore::new(HashMap::from([(
            "viewer".to_string(),
            vec!["miner:r".to_string()],
        )]));
        store.add_user("view@example.com", vec!["viewer".into()]);
        Arc::new(store)
    }

    fn app(state: AuthState) -> Router {
        async fn whoami(Authenticated(ctx): Authenticated) -> String {
            ctx.email().unwrap_or("anonymous").to_string()
        }
        async fn ws_whoami(QueryTokenAuth(ctx): QueryTokenAuth) -> String {
            ctx.email().unwrap_or("anonymous").to_string()
        }
        Router::new()
            .route("/me", get(whoami))
            .route("/ws", get(ws_whoami))
            .with_state(state)
    }

    fn request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "192.0.2.1");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_extractor() {
        let store = store();
        let token = store.issue_token("view@example.com", None).unwrap();
        let app = app(state(store, true));

        let res = app.clone().oneshot(request("/me", Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.clone().oneshot(request("/me", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.oneshot(request("/me", Some("pub-bogus"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_query_token_extractor() {
        let store = store();
        let token = store.issue_token("view@example.com", None).unwrap();
        let app = app(state(store, true));

        let res = app
            .clone()
            .oneshot(request(&format!("/ws?token={token}"), None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        // Header tokens are not accepted on the query-token route.
        let res = app.oneshot(request("/ws", Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_address_is_rejected() {
        let store = store();
        let token = store.issue_token("view@example.com", None).unwrap();
        let req = Request::builder()
            .uri("/me")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();

        let res = app(state(store, true)).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_permission_helpers() {
        let store = store();
        let token = store.issue_token("view@example.com", None).unwrap();
        let state = state(store, true);
        let ctx = state
            .authenticate(Some(token), &HeaderMap::new(), Some("127.0.0.1:1".parse().unwrap()))
            .await
            .unwrap();

        assert_eq!(state.require_write(&ctx).await.unwrap_err(), AuthError::WritePermRequired);
        assert_eq!(
            state.require_perms(&ctx, &["miner:r"]).await.unwrap_err(),
            AuthError::NoPermissions
        );
        assert!(state.check_perms(&ctx, false, &["miner:r"], false).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_auth_allows_everything() {
        let state = state(store(), false);
        let ctx = state.authenticate(None, &HeaderMap::new(), None).await.unwrap();

        assert!(!ctx.is_authenticated());
        assert!(state.require_write(&ctx).await.unwrap().write);
        assert!(state.require_perms(&ctx, &["users:w"]).await.is_ok());
    }
}
