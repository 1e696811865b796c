//! Live alert streaming over WebSocket.

mod registry;
mod service;

pub use registry::{ALERTS_CHANNEL, CLIENT_BUFFER, ClientId, ClientRegistry};
pub use service::{AlertService, alerts_query, flatten_alerts};
