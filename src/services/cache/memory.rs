use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;

use crate::services::cache::client::{CacheClient, CacheResult};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache with the same single-key semantics as `ValkeyClient`.
///
/// Used when no `VALKEY_URL` is configured in development, and by tests. Entries are
/// evicted lazily on access. Uses `tokio::time::Instant`, so paused test clocks apply.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if map.get(key).is_some_and(|e| e.expires_at <= now) {
            map.remove(key);
        }
        map.get_mut(key)
    }
}

// Longest lifetime an entry can get; larger TTLs are capped to it.
const MAX_ENTRY_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

fn expiry(ttl: Duration) -> Instant {
    let now = Instant::now();
    let ttl = ttl.clamp(Duration::from_secs(1), MAX_ENTRY_TTL);
    now.checked_add(ttl).unwrap_or(now)
}

#[async_trait]
impl CacheClient for MemoryCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let mut map = self.entries.lock();
        Ok(Self::live_entry(&mut map, key).map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut map = self.entries.lock();
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let mut map = self.entries.lock();
        if Self::live_entry(&mut map, key).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry(ttl),
            },
        );
        Ok(true)
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> CacheResult<bool> {
        let mut map = self.entries.lock();
        match Self::live_entry(&mut map, key) {
            Some(entry) => {
                entry.value = value.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn take_string(&self, key: &str) -> CacheResult<Option<String>> {
        let mut map = self.entries.lock();
        if Self::live_entry(&mut map, key).is_none() {
            return Ok(None);
        }
        Ok(map.remove(key).map(|e| e.value))
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let mut map = self.entries.lock();
        let existed = Self::live_entry(&mut map, key).is_some();
        map.remove(key);
        Ok(u64::from(existed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set_with_ttl("k", "v", Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get_string("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_string("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_only_sets_once() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);

        assert!(cache.set_if_absent_with_ttl("k", "a", ttl).await.unwrap());
        assert!(!cache.set_if_absent_with_ttl("k", "b", ttl).await.unwrap());
        assert_eq!(cache.get_string("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn replace_keeps_ttl_and_skips_missing_keys() {
        let cache = MemoryCache::new();
        assert!(!cache.replace_keep_ttl("missing", "x").await.unwrap());
        assert_eq!(cache.get_string("missing").await.unwrap(), None);

        cache
            .set_with_ttl("k", "a", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.replace_keep_ttl("k", "b").await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get_string("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttl_is_capped() {
        let cache = MemoryCache::new();
        cache.set_with_ttl("k", "v", Duration::MAX).await.unwrap();
        assert_eq!(cache.get_string("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(MAX_ENTRY_TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.get_string("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn take_returns_value_once() {
        let cache = MemoryCache::new();
        cache
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.take_string("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.take_string("k").await.unwrap(), None);
        assert_eq!(cache.del("k").await.unwrap(), 0);
    }
}
