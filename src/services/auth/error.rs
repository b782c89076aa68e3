use thiserror::Error;

/// Per-request authentication failures.
///
/// All of these are recovered at the request boundary (`AppError`) and turned into a
/// rejection response; none of them is fatal for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature invalid")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    // Also used for unknown usernames so callers cannot enumerate accounts.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("refresh token invalid")]
    RefreshTokenInvalid,
    #[error("identity provider error")]
    ProviderError,
    #[error("federated identity must be linked explicitly")]
    AccountLinkRequired,
}

impl AuthError {
    /// Stable machine-readable code for the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Malformed => "TOKEN_MALFORMED",
            AuthError::SignatureInvalid => "TOKEN_SIGNATURE_INVALID",
            AuthError::Expired => "TOKEN_EXPIRED",
            AuthError::Revoked => "TOKEN_REVOKED",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::RefreshTokenInvalid => "REFRESH_TOKEN_INVALID",
            AuthError::ProviderError => "PROVIDER_ERROR",
            AuthError::AccountLinkRequired => "ACCOUNT_LINK_REQUIRED",
        }
    }

    /// True for failures of a presented bearer token.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AuthError::Malformed
                | AuthError::SignatureInvalid
                | AuthError::Expired
                | AuthError::Revoked
        )
    }
}
