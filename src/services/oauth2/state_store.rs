use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::cache::{CacheClient, CacheError};

/// What the callback needs to finish an authorization started by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub provider: String,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Single-use `state` values, keyed `oauth2:state:<state>`.
///
/// `put` never overwrites; `take` is GETDEL, so a replayed callback finds nothing.
#[derive(Clone, Debug)]
pub struct PendingAuthorizations<C: CacheClient> {
    cache: C,
    ttl: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum PendingError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid pending authorization: {0}")]
    Record(#[from] serde_json::Error),
}

impl<C: CacheClient> PendingAuthorizations<C> {
    pub fn new(cache: C, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(state: &str) -> String {
        format!("oauth2:state:{state}")
    }

    /// Returns `false` if the state value is already in use.
    pub async fn put(
        &self,
        state: &str,
        pending: &PendingAuthorization,
    ) -> Result<bool, PendingError> {
        let value = serde_json::to_string(pending)?;
        Ok(self
            .cache
            .set_if_absent_with_ttl(&Self::key(state), &value, self.ttl)
            .await?)
    }

    pub async fn take(&self, state: &str) -> Result<Option<PendingAuthorization>, PendingError> {
        match self.cache.take_string(&Self::key(state)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
