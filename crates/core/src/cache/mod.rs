//! Tiered Cache Manager (§4.5): category-partitioned LRU+TTL with
//! at-most-one-concurrent-loader `getOrFetch` semantics and secure-token
//! checksumming.

mod token;

pub use token::{SecureToken, TokenCategory};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    UserInfo,
    ChatInfo,
    Departments,
    AppTokens,
    UserTokens,
    BaseMetadata,
    GenericApi,
    CalendarData,
}

impl Category {
    /// Illustrative default TTLs from §6.2.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Category::UserInfo => Duration::from_secs(30 * 60),
            Category::ChatInfo => Duration::from_secs(15 * 60),
            Category::Departments => Duration::from_secs(60 * 60),
            Category::AppTokens => Duration::from_secs(110 * 60),
            Category::UserTokens => Duration::from_secs(110 * 60),
            Category::BaseMetadata => Duration::from_secs(20 * 60),
            Category::GenericApi => Duration::from_secs(5 * 60),
            Category::CalendarData => Duration::from_secs(2 * 60),
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Category::UserInfo => "UserInfo",
            Category::ChatInfo => "ChatInfo",
            Category::Departments => "Departments",
            Category::AppTokens => "AppTokens",
            Category::UserTokens => "UserTokens",
            Category::BaseMetadata => "BaseMetadata",
            Category::GenericApi => "GenericApi",
            Category::CalendarData => "CalendarData",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub created_at: std::time::Instant,
    pub expires_at: std::time::Instant,
}

fn full_key(category: Category, key: &str) -> String {
    format!("{}:{}", category.prefix(), key)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Wraps a single `moka::future::Cache` across all categories (§4.5: "a
/// single capacity-bounded LRU across all categories"). `moka`'s `get_with`
/// supplies the `getOrFetch` single-flight guarantee and its TinyLFU
/// admission policy gives amortized O(1) eviction.
pub struct CacheManager {
    inner: MokaCache<String, CacheEntry>,
    stats: parking_lot::Mutex<HashMap<Category, CacheStats>>,
}

impl CacheManager {
    pub fn new(max_entries: u64) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_entries)
            .support_invalidation_closures()
            .build();
        Self {
            inner,
            stats: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, category: Category, f: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.lock();
        f(stats.entry(category).or_default());
    }

    /// `get(category, key)`. Miss on absent or expired; never returns an
    /// expired entry.
    pub async fn get(&self, category: Category, key: &str) -> Option<serde_json::Value> {
        let full = full_key(category, key);
        match self.inner.get(&full).await {
            Some(entry) if entry.expires_at > std::time::Instant::now() => {
                self.record(category, |s| s.hits += 1);
                Some(entry.value)
            }
            Some(_) => {
                self.inner.invalidate(&full).await;
                self.record(category, |s| s.misses += 1);
                None
            }
            None => {
                self.record(category, |s| s.misses += 1);
                None
            }
        }
    }

    /// `set(category, key, value, ttl?)`.
    pub async fn set(
        &self,
        category: Category,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) {
        let now = std::time::Instant::now();
        let ttl = ttl.unwrap_or_else(|| category.default_ttl());
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + ttl,
        };
        self.inner.insert(full_key(category, key), entry).await;
    }

    /// `getOrFetch(category, key, loader, ttl?)`. `moka::get_with` dedups
    /// concurrent callers onto a single loader invocation; a loader error
    /// is surfaced to every waiter and nothing is cached (§4.5 invariant:
    /// "failures never populate the cache").
    pub async fn get_or_fetch<F, Fut>(
        &self,
        category: Category,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<serde_json::Value, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, CoreError>>,
    {
        let full = full_key(category, key);
        if let Some(entry) = self.inner.get(&full).await {
            if entry.expires_at > std::time::Instant::now() {
                self.record(category, |s| s.hits += 1);
                return Ok(entry.value);
            }
            // Present but expired: evict so `or_try_insert_with` below runs
            // the loader instead of finding and returning the stale entry.
            self.inner.invalidate(&full).await;
        }

        let ttl = ttl.unwrap_or_else(|| category.default_ttl());
        let result = self
            .inner
            .entry(full.clone())
            .or_try_insert_with(async move {
                let value = loader().await?;
                let now = std::time::Instant::now();
                Ok::<CacheEntry, CoreError>(CacheEntry {
                    value,
                    created_at: now,
                    expires_at: now + ttl,
                })
            })
            .await;

        match result {
            Ok(entry) => {
                self.record(category, |s| s.misses += 1);
                trace!(category = ?category, key, "cache getOrFetch populated");
                Ok(entry.into_value().value)
            }
            Err(shared) => Err(match Arc::try_unwrap(shared) {
                Ok(err) => err,
                Err(shared) => CoreError::Internal(shared.to_string()),
            }),
        }
    }

    pub async fn invalidate_category(&self, category: Category) {
        let prefix = format!("{}:", category.prefix());
        self.inner
            .invalidate_entries_if(move |k, _| k.starts_with(&prefix))
            .expect("invalidate_entries_if requires eviction listener disabled");
        self.inner.run_pending_tasks().await;
        let mut stats = self.stats.lock();
        stats.entry(category).or_default().evictions += 1;
    }

    pub async fn invalidate_pattern(&self, pattern: &Regex) {
        let pattern = pattern.clone();
        self.inner
            .invalidate_entries_if(move |k, _| pattern.is_match(k))
            .expect("invalidate_entries_if requires eviction listener disabled");
        self.inner.run_pending_tasks().await;
    }

    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        self.stats.lock().clear();
    }

    pub fn stats(&self, category: Category) -> CacheStats {
        self.stats.lock().get(&category).copied().unwrap_or_default()
    }

    /// `setToken` (§4.5 "token caching is a specialization"): stores a
    /// [`SecureToken`] the same way any other cached value is stored.
    pub async fn set_token(
        &self,
        category: TokenCategory,
        key: &str,
        token: SecureToken,
        ttl: Option<Duration>,
    ) {
        let value = serde_json::to_value(&token).expect("SecureToken always serializes");
        self.set(category.into_cache_category(), key, value, ttl).await;
    }

    /// `getToken`: recomputes the checksum on every retrieval. A mismatch
    /// is treated exactly like a miss, and the corrupt entry is evicted so
    /// a subsequent call re-fetches instead of seeing it again.
    pub async fn get_token(&self, category: TokenCategory, key: &str) -> Option<SecureToken> {
        let cache_category = category.into_cache_category();
        let value = self.get(cache_category, key).await?;
        let token: SecureToken = match serde_json::from_value(value) {
            Ok(token) => token,
            Err(_) => {
                self.inner.invalidate(&full_key(cache_category, key)).await;
                return None;
            }
        };
        if token.verify().is_some() {
            Some(token)
        } else {
            self.inner.invalidate(&full_key(cache_category, key)).await;
            self.record(cache_category, |s| s.evictions += 1);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn set_then_get_within_ttl_returns_same_value() {
        let cache = CacheManager::new(100);
        cache
            .set(Category::UserInfo, "u1", serde_json::json!({"name": "A"}), None)
            .await;
        let value = cache.get(Category::UserInfo, "u1").await.unwrap();
        assert_eq!(value, serde_json::json!({"name": "A"}));
    }

    #[tokio::test]
    async fn get_or_fetch_runs_loader_once_for_concurrent_callers() {
        let cache = Arc::new(CacheManager::new(100));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(Category::UserInfo, "u1", None, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Ok(serde_json::json!({"name": "A"}))
                        }
                    })
                    .await
            }));
        }

        for h in handles {
            let value = h.await.unwrap().unwrap();
            assert_eq!(value, serde_json::json!({"name": "A"}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_failure_is_not_cached() {
        let cache = CacheManager::new(100);
        let err = cache
            .get_or_fetch(Category::GenericApi, "k", None, || async {
                Err(CoreError::Upstream {
                    status: Some(500),
                    message: "boom".into(),
                })
            })
            .await;
        assert!(err.is_err());
        assert!(cache.get(Category::GenericApi, "k").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_never_returned() {
        let cache = CacheManager::new(100);
        cache
            .set(
                Category::CalendarData,
                "k",
                serde_json::json!(1),
                Some(Duration::from_millis(1)),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(Category::CalendarData, "k").await.is_none());
    }

    #[tokio::test]
    async fn get_or_fetch_refreshes_an_expired_entry_instead_of_returning_it() {
        let cache = CacheManager::new(100);
        cache
            .set(
                Category::GenericApi,
                "k",
                serde_json::json!("stale"),
                Some(Duration::from_millis(1)),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let value = cache
            .get_or_fetch(Category::GenericApi, "k", None, || async {
                Ok(serde_json::json!("fresh"))
            })
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!("fresh"));
    }

    #[tokio::test]
    async fn token_round_trips_through_set_and_get() {
        let cache = CacheManager::new(100);
        let token = SecureToken::new("t-abc123", Duration::from_secs(60));
        cache
            .set_token(TokenCategory::AppTokens, "tenant-1", token, None)
            .await;

        let fetched = cache
            .get_token(TokenCategory::AppTokens, "tenant-1")
            .await
            .unwrap();
        assert_eq!(fetched.plaintext, "t-abc123");
    }

    #[tokio::test]
    async fn token_checksum_mismatch_is_evicted_on_get() {
        let cache = CacheManager::new(100);
        let mut token = SecureToken::new("t-abc123", Duration::from_secs(60));
        token.checksum = token.checksum.wrapping_add(1);
        cache
            .set_token(TokenCategory::UserTokens, "user-1", token, None)
            .await;

        assert!(cache
            .get_token(TokenCategory::UserTokens, "user-1")
            .await
            .is_none());
        // The corrupt entry was evicted, not merely skipped.
        assert!(cache.get(Category::UserTokens, "user-1").await.is_none());
    }
}
