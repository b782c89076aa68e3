use std::{future::Future, pin::Pin, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::cache::{CacheClient, CacheError};

pub type SessionFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, SessionStoreError>> + Send + 'a>>;

/// Shared record of issued access tokens, keyed by token id (`jti`).
///
/// - `record`: store `{principal, expiry, revoked=false}` for the token's remaining lifetime.
/// - `revoke`: mark an existing record revoked. Unknown/expired ids are a no-op (`Ok(false)`).
/// - `is_revoked`: `true` only for an existing record with `revoked=true`; absence means
///   "not revoked".
///
/// `Err(_)` is a backend failure; the caller's cache failure policy decides what it means.
pub trait SessionStore: Send + Sync {
    fn record(&self, token_id: Uuid, principal_id: Uuid, expires_at: i64) -> SessionFuture<'_, ()>;

    fn revoke(&self, token_id: Uuid) -> SessionFuture<'_, bool>;

    fn is_revoked(&self, token_id: Uuid) -> SessionFuture<'_, bool>;
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("invalid session record: {0}")]
    Record(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub principal_id: Uuid,
    pub expires_at: i64,
    pub revoked: bool,
}

/// Cache-backed session store (Valkey in production, memory in development/tests).
#[derive(Clone, Debug)]
pub struct SessionCache<C: CacheClient> {
    cache: C,
    // Optional key prefix to avoid collisions across environments
    prefix: String,
}

impl<C: CacheClient> SessionCache<C> {
    pub fn new(cache: C) -> Self {
        Self::new_with_prefix(cache, "session")
    }

    pub fn new_with_prefix(cache: C, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, token_id: &Uuid) -> String {
        format!("{}:{}", self.prefix, token_id)
    }
}

impl<C: CacheClient> SessionStore for SessionCache<C> {
    fn record(&self, token_id: Uuid, principal_id: Uuid, expires_at: i64) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            let remaining = expires_at - chrono::Utc::now().timestamp();
            if remaining <= 0 {
                // Already expired: nothing to revoke later.
                return Ok(());
            }

            let record = SessionRecord {
                principal_id,
                expires_at,
                revoked: false,
            };
            let value = serde_json::to_string(&record)?;

            self.cache
                .set_with_ttl(
                    &self.key(&token_id),
                    &value,
                    Duration::from_secs(remaining as u64),
                )
                .await?;
            Ok(())
        })
    }

    fn revoke(&self, token_id: Uuid) -> SessionFuture<'_, bool> {
        Box::pin(async move {
            let key = self.key(&token_id);

            let Some(raw) = self.cache.get_string(&key).await? else {
                return Ok(false);
            };
            let mut record: SessionRecord = serde_json::from_str(&raw)?;
            if record.revoked {
                return Ok(true);
            }
            record.revoked = true;

            // XX + KEEPTTL: a record that expired in between stays gone, and the
            // revoked record still disappears at the token's natural expiry.
            let updated = self
                .cache
                .replace_keep_ttl(&key, &serde_json::to_string(&record)?)
                .await?;
            Ok(updated)
        })
    }

    fn is_revoked(&self, token_id: Uuid) -> SessionFuture<'_, bool> {
        Box::pin(async move {
            match self.cache.get_string(&self.key(&token_id)).await? {
                Some(raw) => {
                    let record: SessionRecord = serde_json::from_str(&raw)?;
                    Ok(record.revoked)
                }
                None => Ok(false),
            }
        })
    }
}
