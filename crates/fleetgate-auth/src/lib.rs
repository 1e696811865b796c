//! Authentication and authorization for the fleetgate gateway.
//!
//! A request's opaque token is resolved into a [`ResolvedIdentity`] by the
//! [`TokenResolver`], which fronts an external [`IdentityProvider`] with a
//! short-lived [`IdentityCache`]. Capability checks go through the
//! [`PermissionEvaluator`], which derives a [`PermissionSet`] fresh on every
//! call. The [`middleware`] module wires both into axum.

pub mod cache;
pub mod error;
pub mod identity;
pub mod memory;
pub mod middleware;
pub mod permissions;
pub mod resolver;

pub use cache::{CacheStats, IdentityCache};
pub use error::AuthError;
pub use identity::{
    IdentityMetadata, IdentityProvider, RegenerateTokenRequest, ResolveOptions, ResolvedIdentity,
    TokenPermissions,
};
pub use memory::MemoryIdentityStore;
pub use middleware::{AuthState, Authenticated, QueryTokenAuth};
pub use permissions::{PermissionEvaluator, PermissionSet};
pub use resolver::{AuthContext, TokenResolver};
