//! Cache store adapter: TTL key/value storage with namespacing, glob
//! invalidation, and soft-fail-open semantics.
//!
//! The adapter sits between the Cacheable/InvalidateCache interceptors and
//! a backing [`CacheStore`]. Store failures are absorbed: `get` degrades to
//! a miss and writes become best-effort, optionally served by an
//! in-process fallback map. That availability-over-consistency tradeoff is
//! deliberate; callers never see [`crate::CoreError::CacheUnavailable`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::CoreResult;

/// Derives the un-namespaced cache key for a method invocation.
///
/// Identical (method, arguments) always produce the identical key: serde
/// serializes tuples positionally and struct fields in declaration order.
pub fn cache_key(method: &str, args: &Value) -> String {
    let args = serde_json::to_string(args).unwrap_or_else(|_| "null".to_string());
    format!("{method}:{args}")
}

/// Backing store boundary.
///
/// Implementations may fail with [`crate::CoreError::CacheUnavailable`];
/// the adapter absorbs those failures.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Side-effect free lookup. `None` is a miss.
    async fn get(&self, key: &str) -> CoreResult<Option<Value>>;

    /// Stores `value` under `key`, overwriting any prior entry.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> CoreResult<()>;

    /// Deletes every key matching the glob `pattern`, returning the count.
    async fn delete_pattern(&self, pattern: &str) -> CoreResult<u64>;
}

struct Slot {
    value: Value,
    expires_at: Instant,
}

/// Process-local store. Used directly in tests and as the adapter's
/// fallback when the external store is unreachable.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|s| s.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CoreResult<Option<Value>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let hit = entries
            .get(key)
            .map(|slot| (slot.expires_at > now).then(|| slot.value.clone()));
        match hit {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> CoreResult<()> {
        let slot = Slot { value, expires_at: Instant::now() + ttl };
        self.entries.lock().insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> CoreResult<u64> {
        // Single retain under the lock: later calls never observe a
        // partially applied deletion.
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        Ok((before - entries.len()) as u64)
    }
}

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix prepended to every key and pattern.
    pub namespace: String,
    /// Serve reads/writes from a process-local map while the backing
    /// store is unreachable. Process-local only; not shared across
    /// instances.
    pub use_memory_fallback: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { namespace: "cache".to_string(), use_memory_fallback: false }
    }
}

/// Namespaced, soft-failing facade over a [`CacheStore`].
pub struct CacheAdapter {
    store: Arc<dyn CacheStore>,
    fallback: Option<MemoryStore>,
    namespace: String,
}

impl CacheAdapter {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            fallback: config.use_memory_fallback.then(MemoryStore::new),
            namespace: config.namespace,
        }
    }

    /// Adapter over a fresh in-process store. Handy for tests and
    /// single-instance deployments.
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            fallback: None,
            namespace: namespace.into(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Lookup that never fails: a store error is a miss, or a fallback
    /// read when the fallback is enabled.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let key = self.namespaced(key);
        match self.store.get(&key).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::debug!(target: "crosscut", key = %key, "cache read failed, treating as miss: {err}");
                match &self.fallback {
                    Some(fallback) => fallback.get(&key).await.ok().flatten(),
                    None => None,
                }
            }
        }
    }

    /// Best-effort write; diverted to the fallback when the store is
    /// unreachable and the fallback is enabled.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let key = self.namespaced(key);
        if let Err(err) = self.store.set(&key, value.clone(), ttl).await {
            tracing::debug!(target: "crosscut", key = %key, "cache write failed: {err}");
            if let Some(fallback) = &self.fallback {
                let _ = fallback.set(&key, value, ttl).await;
            }
        }
    }

    /// Deletes all matching keys from the store and the fallback,
    /// returning the total removed. Best-effort when the store is down.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let pattern = self.namespaced(pattern);
        let mut deleted = match self.store.delete_pattern(&pattern).await {
            Ok(count) => count,
            Err(err) => {
                tracing::debug!(target: "crosscut", pattern = %pattern, "cache invalidation failed: {err}");
                0
            }
        };
        if let Some(fallback) = &self.fallback {
            deleted += fallback.delete_pattern(&pattern).await.unwrap_or(0);
        }
        deleted
    }
}

/// Glob matcher supporting `*` (any run) and `?` (any single character).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(star_at) = star {
            pi = star_at + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_matching() {
        assert!(glob_match("BookingService:*", "BookingService:find:[1]"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
        assert!(!glob_match("BookingService:*", "InvoiceService:find"));
        assert!(glob_match("*:find:*", "BookingService:find:[42]"));
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn cache_key_is_stable_for_identical_args() {
        let a = cache_key("BookingService.find", &json!(["c-1", 2]));
        let b = cache_key("BookingService.find", &json!(["c-1", 2]));
        let c = cache_key("BookingService.find", &json!(["c-1", 3]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryStore::new();
        store
            .set("k", json!(1), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_pattern_counts_matches_only() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("svc:a", json!(1), ttl).await.unwrap();
        store.set("svc:b", json!(2), ttl).await.unwrap();
        store.set("other:a", json!(3), ttl).await.unwrap();

        let deleted = store.delete_pattern("svc:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.get("other:a").await.unwrap(), Some(json!(3)));
        assert_eq!(store.get("svc:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn adapter_namespaces_keys_on_a_shared_store() {
        let store = Arc::new(MemoryStore::new());
        let adapter = CacheAdapter::new(
            store.clone(),
            CacheConfig { namespace: "tenant-a".to_string(), use_memory_fallback: false },
        );
        adapter.set("k", json!("v"), Duration::from_secs(60)).await;
        assert_eq!(adapter.get("k").await, Some(json!("v")));

        let other = CacheAdapter::new(
            store,
            CacheConfig { namespace: "tenant-b".to_string(), use_memory_fallback: false },
        );
        assert_eq!(other.get("k").await, None);
    }
}
