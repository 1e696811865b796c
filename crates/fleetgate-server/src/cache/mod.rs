//! Response caching for gateway endpoints.

mod request;

pub use request::{CacheBucket, KEY_SEPARATOR, MISSING_PART, RequestCache, cache_key};
