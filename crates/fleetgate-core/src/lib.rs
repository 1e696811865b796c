//! Shared building blocks for the fleetgate gateway.
//!
//! This crate has no HTTP or runtime dependencies. It defines what a backend
//! node is, the contract of the upstream RPC collaborator used to reach one,
//! and the typed filter model that query parameters are validated into before
//! they are forwarded to the fleet.

pub mod filter;
pub mod node;
pub mod query;
pub mod rpc;

pub use filter::{Filter, FilterError, FilterExpr, FilterOp};
pub use node::BackendNode;
pub use query::ThingQuery;
pub use rpc::{RpcError, RpcOptions, RpcTransport};
