use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::auth::{AuthError, Realm};
use crate::services::cache::{CacheClient, CacheError};

/// What a refresh token stands for. Stored under the token hash, never under the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshGrant {
    pub principal_id: Uuid,
    pub realm: Realm,
}

/// Opaque, single-use refresh tokens kept in the shared cache.
///
/// - `issue` stores `sha256(token)` → grant with the refresh TTL.
/// - `consume` is GETDEL: of two concurrent refreshes with the same token, one wins.
#[derive(Clone)]
pub struct RefreshTokenService<C: CacheClient> {
    cache: C,
    ttl: Duration,
}

impl<C: CacheClient> std::fmt::Debug for RefreshTokenService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenService")
            .field("ttl_seconds", &self.ttl.as_secs())
            .finish()
    }
}

impl<C: CacheClient> RefreshTokenService<C> {
    pub fn new(cache: C, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(&self, grant: &RefreshGrant) -> Result<String, AppError> {
        let refresh_token = generate_refresh_token()?;
        let value = serde_json::to_string(grant).map_err(|e| {
            error!(error = %e, "failed to encode refresh grant");
            AppError::Internal
        })?;

        debug!(
            principal_id = %grant.principal_id,
            ttl_seconds = self.ttl.as_secs(),
            "issuing refresh token"
        );

        self.cache
            .set_with_ttl(&cache_key(&refresh_token), &value, self.ttl)
            .await
            .map_err(store_failure)?;

        Ok(refresh_token)
    }

    /// Redeem a refresh token. Unknown, expired and already-used tokens are all
    /// `RefreshTokenInvalid`.
    pub async fn consume(&self, refresh_token: &str) -> Result<RefreshGrant, AppError> {
        if refresh_token.is_empty() {
            return Err(AuthError::RefreshTokenInvalid.into());
        }

        let raw = self
            .cache
            .take_string(&cache_key(refresh_token))
            .await
            .map_err(store_failure)?
            .ok_or_else(|| {
                debug!("refresh token not found or already used");
                AppError::Auth(AuthError::RefreshTokenInvalid)
            })?;

        serde_json::from_str(&raw).map_err(|e| {
            error!(error = %e, "stored refresh grant is unreadable");
            AppError::Auth(AuthError::RefreshTokenInvalid)
        })
    }

    /// Drop a refresh token without redeeming it (logout). Unknown tokens are ignored.
    pub async fn discard(&self, refresh_token: &str) -> Result<(), AppError> {
        self.cache
            .del(&cache_key(refresh_token))
            .await
            .map(|_| ())
            .map_err(store_failure)
    }
}

fn store_failure(e: CacheError) -> AppError {
    error!(error = %e, "refresh token store failure");
    AppError::Unavailable
}

fn cache_key(refresh_token: &str) -> String {
    format!("refresh:{}", hash_refresh_token(refresh_token))
}

fn generate_refresh_token() -> Result<String, AppError> {
    // 32 bytes of entropy -> URL-safe base64 without padding.
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).map_err(|e| {
        error!(error = %e, "getrandom failed");
        AppError::Internal
    })?;

    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
