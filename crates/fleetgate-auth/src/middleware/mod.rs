//! HTTP middleware for authentication and authorization.
//!
//! - Credential extraction (bearer header, query token, client addresses)
//! - Request authentication extractors
//! - Error responses for auth failures

pub mod auth;
pub mod error;
pub mod extract;

pub use auth::{AuthState, Authenticated, QueryTokenAuth};
pub use error::error_body;
pub use extract::{bearer_token, client_ips, query_token};
