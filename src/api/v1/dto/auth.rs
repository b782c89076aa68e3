use serde::Deserialize;

use crate::error::AppError;

const MAX_USERNAME_LEN: usize = 128;
// Argon2 accepts more, but nothing legitimate needs it.
const MAX_PASSWORD_LEN: usize = 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(AppError::bad_request(
                "INVALID_REQUEST",
                "username and password are required",
            ));
        }
        if self.username.len() > MAX_USERNAME_LEN || self.password.len() > MAX_PASSWORD_LEN {
            return Err(AppError::bad_request(
                "INVALID_REQUEST",
                "username or password too long",
            ));
        }
        Ok(())
    }
}

/// Body of `POST /auth/refresh`. Browser logins may send the token as a cookie instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl RefreshRequest {
    pub fn token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Optional body of `POST /auth/logout`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}
