pub mod client;
pub mod memory;
pub mod valkey;

use async_trait::async_trait;
use std::time::Duration;

pub use client::{CacheClient, CacheError, CacheResult};
pub use memory::MemoryCache;
pub use valkey::ValkeyClient;

/// The cache backend the application state carries.
///
/// Services stay generic over `CacheClient`; this enum lets `AppState` pick the backend at
/// startup without threading a type parameter through every handler.
#[derive(Clone, Debug)]
pub enum Cache {
    Valkey(ValkeyClient),
    Memory(MemoryCache),
}

#[async_trait]
impl CacheClient for Cache {
    fn backend_name(&self) -> &'static str {
        match self {
            Cache::Valkey(c) => c.backend_name(),
            Cache::Memory(c) => c.backend_name(),
        }
    }

    async fn ping(&self) -> CacheResult<()> {
        match self {
            Cache::Valkey(c) => c.ping().await,
            Cache::Memory(c) => c.ping().await,
        }
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Cache::Valkey(c) => c.get_string(key).await,
            Cache::Memory(c) => c.get_string(key).await,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Cache::Valkey(c) => c.set_with_ttl(key, value, ttl).await,
            Cache::Memory(c) => c.set_with_ttl(key, value, ttl).await,
        }
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        match self {
            Cache::Valkey(c) => c.set_if_absent_with_ttl(key, value, ttl).await,
            Cache::Memory(c) => c.set_if_absent_with_ttl(key, value, ttl).await,
        }
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> CacheResult<bool> {
        match self {
            Cache::Valkey(c) => c.replace_keep_ttl(key, value).await,
            Cache::Memory(c) => c.replace_keep_ttl(key, value).await,
        }
    }

    async fn take_string(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Cache::Valkey(c) => c.take_string(key).await,
            Cache::Memory(c) => c.take_string(key).await,
        }
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        match self {
            Cache::Valkey(c) => c.del(key).await,
            Cache::Memory(c) => c.del(key).await,
        }
    }
}
