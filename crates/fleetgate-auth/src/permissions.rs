//! Permission evaluation.
//!
//! A token's effective permissions are derived fresh on every call from the
//! identity collaborator: nothing here is cached or persisted.

use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::Serialize;

use crate::error::AuthError;
use crate::identity::IdentityProvider;

/// Permission that grants the write flag.
pub const WRITE_PERMISSION: &str = "actions:w";

/// Effective permissions of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub write: bool,
    pub super_admin: bool,
    /// Resource names, in first-seen order.
    pub caps: Vec<String>,
    pub permissions: Vec<String>,
}

/// Resource names of `permissions`, deduplicated.
pub fn caps_of(permissions: &[String]) -> Vec<String> {
    let mut caps: Vec<String> = Vec::with_capacity(permissions.len());
    for perm in permissions {
        let cap = perm.split_once(':').map_or(perm.as_str(), |(res, _)| res);
        if !caps.iter().any(|c| c == cap) {
            caps.push(cap.to_string());
        }
    }
    caps
}

pub struct PermissionEvaluator {
    provider: Arc<dyn IdentityProvider>,
    super_admin_perms: Arc<[String]>,
}

impl PermissionEvaluator {
    /// `super_admin_perms` replaces the raw permission list of superadmins.
    pub fn new(provider: Arc<dyn IdentityProvider>, super_admin_perms: Vec<String>) -> Self {
        Self {
            provider,
            super_admin_perms: super_admin_perms.into(),
        }
    }

    /// Permission set used when authentication is disabled.
    pub fn unrestricted(&self) -> PermissionSet {
        let permissions = self.super_admin_perms.to_vec();
        PermissionSet {
            write: true,
            super_admin: true,
            caps: caps_of(&permissions),
            permissions,
        }
    }

    pub async fn permissions_of(&self, token: &str) -> Result<PermissionSet, AuthError> {
        let raw = self.provider.token_perms(token).await?;

        let write = raw.superadmin || self.provider.token_has_perm(token, WRITE_PERMISSION).await?;
        let permissions = if raw.superadmin {
            self.super_admin_perms.to_vec()
        } else {
            raw.perms
        };

        Ok(PermissionSet {
            write,
            super_admin: raw.superadmin,
            caps: caps_of(&permissions),
            permissions,
        })
    }

    /// Whether `token` passes a route's permission requirement.
    ///
    /// Superadmins always pass. A missing write flag fails before any
    /// per-permission check is made. Otherwise each requested permission is
    /// checked upstream, concurrently; `match_all` requires every check to
    /// pass, else one is enough.
    pub async fn has_perms(
        &self,
        token: &str,
        require_write: bool,
        requested: &[&str],
        match_all: bool,
    ) -> Result<bool, AuthError> {
        let perms = self.permissions_of(token).await?;
        if perms.super_admin {
            return Ok(true);
        }
        if require_write && !perms.write {
            return Ok(false);
        }

        let checks = try_join_all(
            requested
                .iter()
                .map(|perm| self.provider.token_has_perm(token, perm)),
        )
        .await?;

        Ok(if match_all {
            checks.iter().all(|granted| *granted)
        } else {
            checks.iter().any(|granted| *granted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{
        RegenerateTokenRequest, ResolveOptions, ResolvedIdentity, TokenPermissions,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Grants exactly the permissions in `grants`; counts per-permission checks.
    struct TableProvider {
        superadmin: bool,
        perms: Vec<String>,
        grants: HashMap<&'static str, bool>,
        checks: AtomicUsize,
    }

    impl TableProvider {
        fn new(superadmin: bool, perms: &[&str], grants: &[(&'static str, bool)]) -> Self {
            Self {
                superadmin,
                perms: perms.iter().map(|p| p.to_string()).collect(),
                grants: grants.iter().copied().collect(),
                checks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for TableProvider {
        async fn resolve_token(
            &self,
            _token: &str,
            _ips: &[String],
            _opts: ResolveOptions,
        ) -> Result<Option<ResolvedIdentity>, AuthError> {
            Ok(None)
        }

        async fn token_perms(&self, _token: &str) -> Result<TokenPermissions, AuthError> {
            Ok(TokenPermissions {
                superadmin: self.superadmin,
                perms: self.perms.clone(),
            })
        }

        async fn token_has_perm(&self, _token: &str, perm: &str) -> Result<bool, AuthError> {
            if perm != WRITE_PERMISSION {
                self.checks.fetch_add(1, Ordering::SeqCst);
            }
            Ok(self.grants.get(perm).copied().unwrap_or(false))
        }

        async fn regenerate_token(&self, _req: RegenerateTokenRequest) -> Result<String, AuthError> {
            Err(AuthError::AuthFailed)
        }

        async fn cleanup_tokens(&self) -> Result<usize, AuthError> {
            Ok(0)
        }
    }

    fn evaluator(provider: Arc<TableProvider>) -> PermissionEvaluator {
        PermissionEvaluator::new(
            provider,
            vec!["users:rw".into(), "actions:rw".into(), "miner:rw".into()],
        )
    }

    #[test]
    fn test_caps_are_deduplicated_prefixes() {
        let caps = caps_of(&["miner:r".into(), "actions:w".into(), "miner:w".into(), "raw".into()]);
        assert_eq!(caps, vec!["miner", "actions", "raw"]);
    }

    #[tokio::test]
    async fn test_permissions_of_regular_user() {
        let provider = Arc::new(TableProvider::new(
            false,
            &["actions:w", "miner:r"],
            &[("actions:w", true)],
        ));
        let perms = evaluator(provider).permissions_of("t").await.unwrap();

        assert!(perms.write);
        assert!(!perms.super_admin);
        assert_eq!(perms.caps, vec!["actions", "miner"]);
    }

    #[tokio::test]
    async fn test_superadmin_gets_configured_permissions() {
        let provider = Arc::new(TableProvider::new(true, &["ignored:r"], &[]));
        let perms = evaluator(provider).permissions_of("t").await.unwrap();

        assert!(perms.write);
        assert!(perms.super_admin);
        assert_eq!(perms.permissions, vec!["users:rw", "actions:rw", "miner:rw"]);
        assert_eq!(perms.caps, vec!["users", "actions", "miner"]);
    }

    #[tokio::test]
    async fn test_match_all_semantics() {
        let provider = Arc::new(TableProvider::new(false, &[], &[("A", true), ("B", false)]));
        let eval = evaluator(provider);

        assert!(!eval.has_perms("t", false, &["A", "B"], true).await.unwrap());
        assert!(eval.has_perms("t", false, &["A", "B"], false).await.unwrap());
    }

    #[tokio::test]
    async fn test_superadmin_override() {
        let provider = Arc::new(TableProvider::new(true, &[], &[]));
        let eval = evaluator(provider.clone());

        assert!(eval.has_perms("t", true, &["nothing:w"], true).await.unwrap());
        assert_eq!(provider.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_fast_fail_skips_checks() {
        let provider = Arc::new(TableProvider::new(false, &["A:r"], &[("A", true)]));
        let eval = evaluator(provider.clone());

        assert!(!eval.has_perms("t", true, &["A"], false).await.unwrap());
        assert_eq!(provider.checks.load(Ordering::SeqCst), 0);
    }
}
