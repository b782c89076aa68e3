/*
 * Responsibility
 * - アプリ共通の AppError 定義
 * - IntoResponse 実装 (HTTP status / JSON error body)
 * - AuthError / RepoError を統一的に変換
 */
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::repos::error::RepoError;
use crate::services::auth::AuthError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("authentication required")]
    Unauthenticated,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {resource}")]
    NotFound { resource: &'static str },
    #[error("session store unavailable")]
    Unavailable,
    #[error("request timed out")]
    Timeout,
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    /// Stable machine-readable code, as rendered in `error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest { code, .. } => *code,
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Auth(e) => e.code(),
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Unavailable => "SESSION_STORE_UNAVAILABLE",
            AppError::Timeout => "REQUEST_TIMEOUT",
            AppError::Internal => "INTERNAL",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Bearer token failures share one message; only the code tells them apart.
        let code = self.code();
        let mut challenge: Option<&'static str> = None;

        let (status, message) = match self {
            AppError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message),
            AppError::Unauthenticated => {
                challenge = Some("Bearer");
                (StatusCode::UNAUTHORIZED, "authentication required".into())
            }
            AppError::Auth(e) if e.is_token_error() => {
                challenge = Some(r#"Bearer error="invalid_token""#);
                (StatusCode::UNAUTHORIZED, "authentication failed".into())
            }
            AppError::Auth(e @ AuthError::AccountLinkRequired) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            AppError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into()),
            AppError::NotFound { resource } => {
                (StatusCode::NOT_FOUND, format!("{resource} not found."))
            }
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service temporarily unavailable".into(),
            ),
            AppError::Timeout => (StatusCode::REQUEST_TIMEOUT, "request timed out".into()),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(challenge) = challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(challenge),
            );
        }
        response
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        tracing::error!(error = ?e, "user directory failure");
        AppError::Internal
    }
}
