//! Short-lived identity cache.
//!
//! Resolved identities are cached per `(token, sorted client IPs)` so that a
//! burst of requests from the same client costs one upstream resolution.
//! Entries are never invalidated on permission changes; they simply expire.
//! Expired entries are dropped lazily on read and in bulk by
//! [`IdentityCache::cleanup_expired`], which the server runs on a timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::identity::ResolvedIdentity;

/// Default lifetime of a cached identity.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct CachedEntry {
    identity: Arc<ResolvedIdentity>,
    expires_at: Instant,
}

/// Builds the cache key for a token presented from a set of addresses.
///
/// The addresses are sorted so that the same client is recognised regardless
/// of the order proxies appended them in.
pub fn cache_key(token: &str, ips: &[String]) -> String {
    let mut sorted: Vec<&str> = ips.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{token}:{}", sorted.join(","))
}

/// In-memory identity cache with TTL expiration.
pub struct IdentityCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<Arc<ResolvedIdentity>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.identity));
            }
            drop(entry);
            self.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: String, identity: ResolvedIdentity) -> Arc<ResolvedIdentity> {
        let identity = Arc::new(identity);
        self.entries.insert(
            key,
            CachedEntry {
                identity: Arc::clone(&identity),
                expires_at: Instant::now() + self.ttl,
            },
        );
        identity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }

        removed
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
