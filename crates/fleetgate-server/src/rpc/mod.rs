//! Upstream calls to the backend fleet.

mod fanout;
mod http;

pub use fanout::{RpcFanout, isolated_entry, push_isolated};
pub use http::HttpRpcTransport;
