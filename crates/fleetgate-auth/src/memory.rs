//! In-memory identity store.
//!
//! Implements [`IdentityProvider`] over process-local maps. Used for local
//! development, for deployments whose users are declared in configuration,
//! and throughout the test suites.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;

use crate::error::AuthError;
use crate::identity::{
    DEFAULT_TOKEN_PREFIX, DEFAULT_TOKEN_SCOPE, IdentityMetadata, IdentityProvider,
    RegenerateTokenRequest, ResolveOptions, ResolvedIdentity, TokenPermissions,
};

/// Role name that marks a superadmin.
pub const SUPER_ADMIN_ROLE: &str = "*";

struct UserRecord {
    id: String,
    roles: Vec<String>,
}

struct TokenRecord {
    email: String,
    roles: Vec<String>,
    scope: String,
    expires_at: Option<Instant>,
    last_active: Instant,
}

impl TokenRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Whether a held `resource:levels` permission grants `requested`.
///
/// Levels are single characters; `actions:rw` grants both `actions:r` and
/// `actions:w`. A request without a level only needs the resource.
pub fn permission_grants(held: &str, requested: &str) -> bool {
    let (held_res, held_levels) = held.split_once(':').unwrap_or((held, ""));
    match requested.split_once(':') {
        Some((res, levels)) => res == held_res && levels.chars().all(|c| held_levels.contains(c)),
        None => requested == held_res,
    }
}

fn generate_token(prefix: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}-{}", hex::encode(bytes))
}

/// Identity store backed by concurrent maps.
pub struct MemoryIdentityStore {
    roles: HashMap<String, Vec<String>>,
    users: DashMap<String, UserRecord>,
    tokens: DashMap<String, TokenRecord>,
}

impl MemoryIdentityStore {
    /// Creates a store with the given role -> permissions table.
    pub fn new(roles: HashMap<String, Vec<String>>) -> Self {
        Self {
            roles,
            users: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    /// Registers (or replaces) a user. Returns the user id.
    pub fn add_user(&self, email: impl Into<String>, roles: Vec<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.users.insert(
            email.into(),
            UserRecord {
                id: id.clone(),
                roles,
            },
        );
        id
    }

    /// Issues a fresh token for a registered user. `None` never expires.
    pub fn issue_token(&self, email: &str, ttl: Option<Duration>) -> Result<String, AuthError> {
        let token = generate_token(DEFAULT_TOKEN_PREFIX);
        self.insert_token(token.clone(), email, ttl)?;
        Ok(token)
    }

    /// Registers a caller-chosen token for a registered user.
    pub fn insert_token(
        &self,
        token: impl Into<String>,
        email: &str,
        ttl: Option<Duration>,
    ) -> Result<(), AuthError> {
        let roles = self
            .users
            .get(email)
            .map(|user| user.roles.clone())
            .ok_or(AuthError::AuthFailed)?;
        let now = Instant::now();
        self.tokens.insert(
            token.into(),
            TokenRecord {
                email: email.to_string(),
                roles,
                scope: DEFAULT_TOKEN_SCOPE.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
                last_active: now,
            },
        );
        Ok(())
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// When `token` was last used for a resolution with `update_last_active`.
    pub fn last_active(&self, token: &str) -> Option<Instant> {
        self.tokens.get(token).map(|record| record.last_active)
    }

    pub fn token_scope(&self, token: &str) -> Option<String> {
        self.tokens.get(token).map(|record| record.scope.clone())
    }

    fn live_roles(&self, token: &str) -> Option<Vec<String>> {
        let record = self.tokens.get(token)?;
        record.is_live(Instant::now()).then(|| record.roles.clone())
    }

    fn permissions_for(&self, roles: &[String]) -> TokenPermissions {
        let superadmin = roles.iter().any(|r| r == SUPER_ADMIN_ROLE);
        let mut perms: Vec<String> = Vec::new();
        for role in roles {
            for perm in self.roles.get(role).into_iter().flatten() {
                if !perms.contains(perm) {
                    perms.push(perm.clone());
                }
            }
        }
        TokenPermissions { superadmin, perms }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityStore {
    async fn resolve_token(
        &self,
        token: &str,
        _ips: &[String],
        opts: ResolveOptions,
    ) -> Result<Option<ResolvedIdentity>, AuthError> {
        let now = Instant::now();
        let Some(mut record) = self.tokens.get_mut(token) else {
            return Ok(None);
        };
        if !record.is_live(now) {
            return Ok(None);
        }
        if opts.update_last_active {
            record.last_active = now;
        }

        let Some(user) = self.users.get(&record.email) else {
            return Ok(None);
        };

        Ok(Some(ResolvedIdentity {
            user_id: user.id.clone(),
            metadata: IdentityMetadata::new(record.email.clone(), &record.roles),
        }))
    }

    async fn token_perms(&self, token: &str) -> Result<TokenPermissions, AuthError> {
        Ok(self
            .live_roles(token)
            .map(|roles| self.permissions_for(&roles))
            .unwrap_or_default())
    }

    async fn token_has_perm(&self, token: &str, perm: &str) -> Result<bool, AuthError> {
        let Some(roles) = self.live_roles(token) else {
            return Ok(false);
        };
        let perms = self.permissions_for(&roles);
        Ok(perms.superadmin || perms.perms.iter().any(|held| permission_grants(held, perm)))
    }

    async fn regenerate_token(&self, req: RegenerateTokenRequest) -> Result<String, AuthError> {
        let (email, old_roles) = {
            let record = self.tokens.get(&req.old_token).ok_or(AuthError::AuthFailed)?;
            if !record.is_live(Instant::now()) {
                return Err(AuthError::AuthFailed);
            }
            (record.email.clone(), record.roles.clone())
        };

        let roles = if req.roles.is_empty() {
            old_roles
        } else {
            let superadmin = old_roles.iter().any(|r| r == SUPER_ADMIN_ROLE);
            if !superadmin && !req.roles.iter().all(|r| old_roles.contains(r)) {
                return Err(AuthError::NoPermissions);
            }
            req.roles
        };

        let token = generate_token(&req.prefix);
        let now = Instant::now();
        self.tokens.insert(
            token.clone(),
            TokenRecord {
                email,
                roles,
                scope: req.scope,
                expires_at: Some(now + Duration::from_secs(req.ttl_secs)),
                last_active: now,
            },
        );
        tracing::debug!(ttl_secs = req.ttl_secs, "Issued regenerated token");
        Ok(token)
    }

    async fn cleanup_tokens(&self) -> Result<usize, AuthError> {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, record| record.is_live(now));
        Ok(before.saturating_sub(self.tokens.len()))
    }
}
