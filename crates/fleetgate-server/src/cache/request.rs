//! Time-bucketed response cache with single-flight deduplication.
//!
//! Expensive aggregate queries are cached in one of a few fixed TTL buckets
//! chosen per endpoint. While a value is being produced for a key, identical
//! requests queue behind it instead of calling the producer again; every
//! queued caller receives the same value or the same error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use moka::future::Cache;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::metrics::names;

/// Separator between key parts.
pub const KEY_SEPARATOR: &str = ":";
/// Stand-in for an absent key part.
pub const MISSING_PART: &str = "-";

/// Fixed cache lifetimes an endpoint can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheBucket {
    TenSeconds,
    FifteenSeconds,
    ThirtySeconds,
    FifteenMinutes,
}

impl CacheBucket {
    pub const ALL: [CacheBucket; 4] = [
        Self::TenSeconds,
        Self::FifteenSeconds,
        Self::ThirtySeconds,
        Self::FifteenMinutes,
    ];

    /// Bucket of endpoints without an explicit assignment.
    pub const DEFAULT: CacheBucket = Self::ThirtySeconds;

    pub fn label(self) -> &'static str {
        match self {
            Self::TenSeconds => "10s",
            Self::FifteenSeconds => "15s",
            Self::ThirtySeconds => "30s",
            Self::FifteenMinutes => "15m",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.label() == label)
    }

    pub fn ttl(self) -> Duration {
        match self {
            Self::TenSeconds => Duration::from_secs(10),
            Self::FifteenSeconds => Duration::from_secs(15),
            Self::ThirtySeconds => Duration::from_secs(30),
            Self::FifteenMinutes => Duration::from_secs(15 * 60),
        }
    }
}

/// Joins key parts, substituting [`MISSING_PART`] for `None`.
pub fn cache_key(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .map(|part| part.unwrap_or(MISSING_PART))
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

type Waiter<V> = oneshot::Sender<Result<V, ApiError>>;

struct Inner<V> {
    buckets: HashMap<CacheBucket, Cache<String, V>>,
    endpoints: HashMap<String, String>,
    pending: Mutex<HashMap<String, Vec<Waiter<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> Inner<V> {
    /// Removes the queue for `key` and hands `outcome` to every waiter.
    fn settle(&self, key: &str, outcome: &Result<V, ApiError>) {
        let waiters = self.pending.lock().remove(key).unwrap_or_default();
        for waiter in waiters {
            // A waiter that went away no longer needs the value.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Clears the in-flight marker if the producer task unwinds.
struct PendingGuard<V: Clone + Send + Sync + 'static> {
    inner: Arc<Inner<V>>,
    key: String,
    armed: bool,
}

impl<V: Clone + Send + Sync + 'static> Drop for PendingGuard<V> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.settle(
                &self.key,
                &Err(ApiError::internal("in-flight request did not complete")),
            );
        }
    }
}

/// Response cache shared by all gateway handlers.
pub struct RequestCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for RequestCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> RequestCache<V> {
    /// Creates a cache with every bucket.
    ///
    /// `endpoints` maps endpoint ids to bucket labels; unmapped endpoints use
    /// [`CacheBucket::DEFAULT`].
    pub fn new(max_entries: u64, endpoints: HashMap<String, String>) -> Self {
        Self::with_buckets(&CacheBucket::ALL, max_entries, endpoints)
    }

    /// Creates a cache with only the given buckets.
    pub fn with_buckets(
        buckets: &[CacheBucket],
        max_entries: u64,
        endpoints: HashMap<String, String>,
    ) -> Self {
        let buckets = buckets
            .iter()
            .map(|bucket| {
                let store = Cache::builder()
                    .max_capacity(max_entries)
                    .time_to_live(bucket.ttl())
                    .build();
                (*bucket, store)
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                buckets,
                endpoints,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn bucket_for(&self, endpoint: &str) -> Result<(CacheBucket, &Cache<String, V>), ApiError> {
        let label = self
            .inner
            .endpoints
            .get(endpoint)
            .map(String::as_str)
            .unwrap_or(CacheBucket::DEFAULT.label());

        CacheBucket::from_label(label)
            .and_then(|bucket| self.inner.buckets.get(&bucket).map(|store| (bucket, store)))
            .ok_or_else(|| ApiError::CacheMisconfigured {
                endpoint: endpoint.to_string(),
                bucket: label.to_string(),
            })
    }

    /// Number of keys with a producer currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns the cached value for `key_parts`, or produces it.
    ///
    /// With `overwrite`, the cache read is skipped and the produced value
    /// replaces whatever was stored. A producer that fails caches nothing.
    /// The producer runs on its own task, so coalesced callers are settled
    /// even if the caller that started it goes away.
    pub async fn get<F, Fut>(
        &self,
        key_parts: &[Option<&str>],
        endpoint: &str,
        overwrite: bool,
        producer: F,
    ) -> Result<V, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let (bucket, store) = self.bucket_for(endpoint)?;
        let key = cache_key(key_parts);

        if !overwrite {
            if let Some(value) = store.get(&key).await {
                counter!(names::REQUEST_CACHE_HITS_TOTAL, "bucket" => bucket.label()).increment(1);
                return Ok(value);
            }
        }

        let waiting = {
            let mut pending = self.inner.pending.lock();
            match pending.get_mut(&key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    pending.insert(key.clone(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiting {
            counter!(names::REQUEST_CACHE_COALESCED_TOTAL, "bucket" => bucket.label()).increment(1);
            return rx
                .await
                .unwrap_or_else(|_| Err(ApiError::internal("in-flight request was dropped")));
        }

        counter!(names::REQUEST_CACHE_MISSES_TOTAL, "bucket" => bucket.label()).increment(1);

        let fut = producer();
        let store = store.clone();
        let mut guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            key,
            armed: true,
        };

        let task = tokio::spawn(async move {
            let outcome = fut.await;
            if let Ok(value) = &outcome {
                store.insert(guard.key.clone(), value.clone()).await;
            }
            guard.inner.settle(&guard.key, &outcome);
            guard.armed = false;
            outcome
        });

        task.await
            .unwrap_or_else(|e| Err(ApiError::internal(format!("producer task failed: {e}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> RequestCache<String> {
        RequestCache::new(100, HashMap::new())
    }

    fn slow_producer(
        calls: Arc<AtomicUsize>,
        result: Result<String, ApiError>,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send>>
    {
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                result
            })
        }
    }

    #[test]
    fn test_key_parts() {
        assert_eq!(cache_key(&[Some("list-things"), None, Some("1")]), "list-things:-:1");
        assert_eq!(cache_key(&[]), "");
    }

    #[test]
    fn test_bucket_labels() {
        for bucket in CacheBucket::ALL {
            assert_eq!(CacheBucket::from_label(bucket.label()), Some(bucket));
        }
        assert_eq!(CacheBucket::from_label("1h"), None);
        assert_eq!(CacheBucket::FifteenMinutes.ttl(), Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_producer() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..5).map(|_| {
            cache.get(
                &[Some("k")],
                "/auth/list-things",
                false,
                slow_producer(calls.clone(), Ok("v".into())),
            )
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), "v");
        }
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_shared_and_not_cached() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let err = ApiError::internal("boom");

        let results = join_all((0..3).map(|_| {
            cache.get(
                &[Some("k")],
                "e",
                false,
                slow_producer(calls.clone(), Err(err.clone())),
            )
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap_err().to_string(), "internal error: boom");
        }
        assert_eq!(cache.in_flight(), 0);

        let again = cache
            .get(&[Some("k")], "e", false, slow_producer(calls.clone(), Ok("v".into())))
            .await;
        assert_eq!(again.unwrap(), "v");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hit_skips_producer() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get(&[Some("k")], "e", false, slow_producer(calls.clone(), Ok("v1".into())))
            .await
            .unwrap();
        let hit = cache
            .get(&[Some("k")], "e", false, slow_producer(calls.clone(), Ok("v2".into())))
            .await
            .unwrap();

        assert_eq!(hit, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overwrite_always_produces_and_replaces() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get(&[Some("k")], "e", false, slow_producer(calls.clone(), Ok("v1".into())))
            .await
            .unwrap();
        let fresh = cache
            .get(&[Some("k")], "e", true, slow_producer(calls.clone(), Ok("v2".into())))
            .await
            .unwrap();
        let cached = cache
            .get(&[Some("k")], "e", false, slow_producer(calls.clone(), Ok("v3".into())))
            .await
            .unwrap();

        assert_eq!(fresh, "v2");
        assert_eq!(cached, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.get(&[Some("a")], "e", false, slow_producer(calls.clone(), Ok("a".into()))),
            cache.get(&[Some("b")], "e", false, slow_producer(calls.clone(), Ok("b".into()))),
        );

        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_bucket_is_internal_error() {
        let cache: RequestCache<String> =
            RequestCache::with_buckets(&[CacheBucket::TenSeconds], 10, HashMap::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get(&[Some("k")], "/auth/unmapped", false, slow_producer(calls.clone(), Ok("v".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::CacheMisconfigured { ref bucket, .. } if bucket == "30s"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_endpoint_mapping_selects_bucket() {
        let endpoints = HashMap::from([("/auth/ext-data".to_string(), "10s".to_string())]);
        let cache: RequestCache<String> =
            RequestCache::with_buckets(&[CacheBucket::TenSeconds], 10, endpoints);
        let calls = Arc::new(AtomicUsize::new(0));

        let value = cache
            .get(&[Some("k")], "/auth/ext-data", false, slow_producer(calls, Ok("v".into())))
            .await;
        assert_eq!(value.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_waiters_settle_when_leader_is_dropped() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get(&[Some("k")], "e", false, slow_producer(calls, Ok("v".into())))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get(&[Some("k")], "e", false, slow_producer(calls, Ok("other".into())))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(waiter.await.unwrap().unwrap(), "v");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }
}
