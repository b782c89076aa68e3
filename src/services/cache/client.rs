//! Cache client interface used by higher-level services (session records, refresh tokens,
//! pending OAuth2 authorizations).
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-layer errors (transport/command/serialization).
///
/// Note:
/// - We keep this independent from `AppError` so callers can decide how to fail
///   (fail-open for revocation checks, hard failure for refresh rotation, etc.).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    BackendConnection(String),
    #[error("cache command error: {0}")]
    BackendCommand(String),
    #[error("cache value error: {0}")]
    InvalidValue(String),
}

/// A minimal, string-based cache interface.
///
/// Every operation touches exactly one key and is atomic on the backend, so callers never
/// need cross-key transactions.
///
/// Implementations must be cheap to clone (typically `Arc<...>` inside).
#[async_trait]
pub trait CacheClient: Clone + Send + Sync + 'static {
    // Returns the cache backend name (for logging/health).
    fn backend_name(&self) -> &'static str;

    // Round-trip check used by the health endpoint.
    async fn ping(&self) -> CacheResult<()>;

    // Get UTF-8 string value.
    async fn get_string(&self, key: &str) -> CacheResult<Option<String>>;

    // Set (or overwrite) a value with TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    // Set value if the key does not exist, with TTL.
    //
    // Returns:
    // - `Ok(true)`  if the key was set (not seen before)
    // - `Ok(false)` if the key already exists
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool>;

    // Overwrite the value of an existing key, keeping its remaining TTL.
    //
    // Returns `Ok(false)` (and writes nothing) when the key does not exist.
    async fn replace_keep_ttl(&self, key: &str, value: &str) -> CacheResult<bool>;

    // Get and delete in one step. At most one caller observes `Some` for a given write.
    async fn take_string(&self, key: &str) -> CacheResult<Option<String>>;

    // Delete a key. Returns number of deleted keys.
    async fn del(&self, key: &str) -> CacheResult<u64>;
}
