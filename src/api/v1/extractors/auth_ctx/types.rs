/*
 * Responsibility
 * - The authenticated context a handler sees
 * - The filter pipeline builds it from a validated token and stores it in request
 *   extensions; handlers only ever receive this type
 */

use uuid::Uuid;

use crate::error::AppError;
use crate::services::auth::{Realm, token_codec::VerifiedAccessToken};

/// Context attached to an authenticated request.
///
/// - `user_id` is the token subject
/// - `roles` are coarse-grained; resource ownership is checked by the handler
/// - `token_id` is the `jti`, used for logout and revocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCtx {
    pub user_id: Uuid,
    pub name: String,
    pub roles: Vec<String>,
    pub realm: Realm,
    pub token_id: Uuid,
    pub expires_at: i64,
}

impl AuthCtx {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn require_role(&self, role: &str) -> Result<(), AppError> {
        if self.has_role(role) {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.user_id, role, "missing required role");
            Err(AppError::Forbidden)
        }
    }
}

impl From<VerifiedAccessToken> for AuthCtx {
    fn from(token: VerifiedAccessToken) -> Self {
        Self {
            user_id: token.principal.id,
            name: token.principal.name,
            roles: token.principal.roles,
            realm: token.principal.realm,
            token_id: token.token_id,
            expires_at: token.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(roles: &[&str]) -> AuthCtx {
        AuthCtx {
            user_id: Uuid::nil(),
            name: "alice".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            realm: Realm::Local,
            token_id: Uuid::nil(),
            expires_at: 0,
        }
    }

    #[test]
    fn role_checks() {
        assert!(ctx(&["USER", "ADMIN"]).require_role("admin").is_ok());
        assert!(matches!(
            ctx(&["USER"]).require_role("ADMIN"),
            Err(AppError::Forbidden)
        ));
    }
}
