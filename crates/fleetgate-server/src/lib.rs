pub mod alerts;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod rpc;
pub mod server;
pub mod ws;

pub use alerts::{AlertService, ClientId, ClientRegistry};
pub use cache::{CacheBucket, RequestCache};
pub use config::{AlertsConfig, AppConfig, AuthSettings, CacheConfig, RpcConfig, ServerConfig};
pub use error::{ApiError, ValidationError};
pub use observability::init_tracing;
pub use rpc::{HttpRpcTransport, RpcFanout};
pub use server::{AppState, FleetgateServer, ServerBuilder, build_app};
