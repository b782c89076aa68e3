use serde::Serialize;
use uuid::Uuid;

use crate::api::v1::extractors::AuthCtx;
use crate::services::auth::{Principal, token_service::IssuedTokenPair};

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub roles: Vec<String>,
    pub realm: String,
}

impl From<&Principal> for UserSummary {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            roles: p.roles.clone(),
            realm: p.realm.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: &'static str,
    /// Seconds until the access token expires.
    pub expires_in: u64,
    pub refresh_token: String,
    pub user: UserSummary,
}

impl From<IssuedTokenPair> for TokenResponse {
    fn from(pair: IssuedTokenPair) -> Self {
        Self {
            user: UserSummary::from(&pair.principal),
            access_token: pair.access_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
            refresh_token: pair.refresh_token,
        }
    }
}

/// `GET /me`: what the security context says about the caller.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub name: String,
    pub roles: Vec<String>,
    pub realm: String,
    pub token_id: Uuid,
    pub expires_at: i64,
}

impl From<AuthCtx> for MeResponse {
    fn from(ctx: AuthCtx) -> Self {
        Self {
            id: ctx.user_id,
            name: ctx.name,
            roles: ctx.roles,
            realm: ctx.realm.to_string(),
            token_id: ctx.token_id,
            expires_at: ctx.expires_at,
        }
    }
}
