use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::repos::user_repo::UserDirectory;
use crate::services::auth::{
    AuthError, Principal,
    refresh_token::{RefreshGrant, RefreshTokenService},
    session::SessionStore,
    token_codec::TokenCodec,
};
use crate::services::cache::Cache;

/// Service that orchestrates access-token issuance, session records and refresh-token
/// rotation.
///
/// - TokenCodec signs access tokens.
/// - SessionStore records each access token id so it can be revoked early.
/// - RefreshTokenService issues/rotates opaque refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    codec: Arc<TokenCodec>,
    sessions: Arc<dyn SessionStore>,
    refresh_tokens: RefreshTokenService<Cache>,
    directory: Arc<dyn UserDirectory>,
    access_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("codec", &self.codec)
            .field("refresh_tokens", &self.refresh_tokens)
            .field("access_ttl_seconds", &self.access_ttl.as_secs())
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        refresh_tokens: RefreshTokenService<Cache>,
        directory: Arc<dyn UserDirectory>,
        access_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            sessions,
            refresh_tokens,
            directory,
            access_ttl,
        }
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Issue a new token pair for an authenticated principal.
    pub async fn issue_token_pair(&self, principal: &Principal) -> Result<IssuedTokenPair, AppError> {
        let access = self.codec.issue(principal, self.access_ttl)?;

        // A missing session record only means this token cannot be revoked early; the
        // login itself is still valid.
        if let Err(e) = self
            .sessions
            .record(access.token_id, principal.id, access.expires_at)
            .await
        {
            warn!(
                token_id = %access.token_id,
                user_id = %principal.id,
                error = %e,
                "failed to record session"
            );
        }

        let refresh_token = self
            .refresh_tokens
            .issue(&RefreshGrant {
                principal_id: principal.id,
                realm: principal.realm.clone(),
            })
            .await?;

        info!(
            user_id = %principal.id,
            realm = %principal.realm,
            token_id = %access.token_id,
            "issued token pair"
        );

        Ok(IssuedTokenPair {
            access_token: access.raw,
            token_type: "Bearer",
            expires_in: self.access_ttl.as_secs(),
            refresh_token,
            refresh_expires_in: self.refresh_tokens.ttl().as_secs(),
            token_id: access.token_id,
            principal: principal.clone(),
        })
    }

    /// Redeem a refresh token and issue a new pair (rotation).
    ///
    /// Roles are re-read from the user directory; a principal that was deactivated or
    /// vanished since login cannot refresh.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokenPair, AppError> {
        let grant = self.refresh_tokens.consume(refresh_token).await?;

        let user = self
            .directory
            .find_by_id(grant.principal_id)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| {
                info!(user_id = %grant.principal_id, "refresh for inactive or unknown principal");
                AppError::Auth(AuthError::RefreshTokenInvalid)
            })?;

        self.issue_token_pair(&user.into_principal(grant.realm)).await
    }

    /// Revoke the caller's access token and drop its refresh token, if given.
    ///
    /// Both steps always run; the first failure is returned.
    pub async fn logout(&self, token_id: Uuid, refresh_token: Option<&str>) -> Result<(), AppError> {
        let discarded = match refresh_token {
            Some(refresh_token) => self.refresh_tokens.discard(refresh_token).await,
            None => Ok(()),
        };
        self.revoke(token_id).await?;
        discarded
    }

    /// Mark an access token revoked. Unknown or expired ids are a no-op (`Ok(false)`).
    pub async fn revoke(&self, token_id: Uuid) -> Result<bool, AppError> {
        let revoked = self.sessions.revoke(token_id).await.map_err(|e| {
            error!(token_id = %token_id, error = %e, "failed to revoke session");
            AppError::Unavailable
        })?;
        info!(token_id = %token_id, revoked, "revocation requested");
        Ok(revoked)
    }
}

/// Service-level return type to keep handlers thin.
///
/// Handlers map this into the HTTP DTO (TokenResponse).
#[derive(Clone, Debug)]
pub struct IssuedTokenPair {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub refresh_token: String,
    pub refresh_expires_in: u64,
    pub token_id: Uuid,
    pub principal: Principal,
}
