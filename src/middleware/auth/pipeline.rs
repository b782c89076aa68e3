//! Per-request authentication as an ordered list of named stages.
//!
//! `Unauthenticated -> TokenExtracted -> TokenValidated -> RevocationChecked -> Authenticated`
//!
//! Each stage maps the current state to the next one or rejects the request. A request
//! without a bearer token (or access token cookie) stays `Unauthenticated` through every
//! stage; whether that is acceptable is decided by the handler (see `AuthCtxExtractor`).
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use tracing::{debug, error, warn};

use crate::api::v1::extractors::AuthCtx;
use crate::api::v1::frontend::read_cookie;
use crate::error::AppError;
use crate::services::auth::{
    AuthError,
    session::SessionStore,
    token_codec::{TokenCodec, VerifiedAccessToken},
};

#[derive(Debug, Clone)]
pub enum FilterState {
    Unauthenticated,
    TokenExtracted(String),
    TokenValidated(VerifiedAccessToken),
    RevocationChecked(VerifiedAccessToken),
    Authenticated(AuthCtx),
}

impl FilterState {
    fn name(&self) -> &'static str {
        match self {
            FilterState::Unauthenticated => "unauthenticated",
            FilterState::TokenExtracted(_) => "token_extracted",
            FilterState::TokenValidated(_) => "token_validated",
            FilterState::RevocationChecked(_) => "revocation_checked",
            FilterState::Authenticated(_) => "authenticated",
        }
    }
}

#[derive(Debug)]
pub enum StageOutcome {
    Continue(FilterState),
    Reject(AppError),
}

impl StageOutcome {
    fn reject(e: AuthError) -> Self {
        StageOutcome::Reject(AppError::Auth(e))
    }
}

#[async_trait]
pub trait FilterStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, headers: &HeaderMap, state: FilterState) -> StageOutcome;
}

/// What a revocation check does when the session cache errors or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFailurePolicy {
    /// Treat the token as not revoked and log a warning.
    FailOpen,
    /// Reject the request (503).
    FailClosed,
}

/// Reads `Authorization: Bearer <token>`. The scheme is case-insensitive and may be
/// followed by any whitespace; any other scheme counts as "no bearer token".
///
/// With a cookie name set, a request without a bearer token falls back to that cookie.
pub struct ExtractBearer {
    cookie: Option<&'static str>,
}

impl ExtractBearer {
    pub fn header_only() -> Self {
        Self { cookie: None }
    }

    pub fn with_cookie(name: &'static str) -> Self {
        Self { cookie: Some(name) }
    }

    fn from_cookie(&self, headers: &HeaderMap) -> FilterState {
        self.cookie
            .and_then(|name| read_cookie(headers, name))
            .map(FilterState::TokenExtracted)
            .unwrap_or(FilterState::Unauthenticated)
    }
}

#[async_trait]
impl FilterStage for ExtractBearer {
    fn name(&self) -> &'static str {
        "extract_bearer"
    }

    async fn apply(&self, headers: &HeaderMap, state: FilterState) -> StageOutcome {
        if !matches!(state, FilterState::Unauthenticated) {
            return StageOutcome::Continue(state);
        }

        let mut values = headers.get_all(header::AUTHORIZATION).iter();
        let Some(value) = values.next() else {
            return StageOutcome::Continue(self.from_cookie(headers));
        };
        if values.next().is_some() {
            return StageOutcome::reject(AuthError::Malformed);
        }

        let Ok(value) = value.to_str() else {
            return StageOutcome::reject(AuthError::Malformed);
        };

        let value = value.trim();
        let (scheme, token) = value
            .split_once(|c: char| c.is_ascii_whitespace())
            .unwrap_or((value, ""));
        if !scheme.eq_ignore_ascii_case("bearer") {
            return StageOutcome::Continue(self.from_cookie(headers));
        }

        let token = token.trim();
        if token.is_empty() {
            return StageOutcome::reject(AuthError::Malformed);
        }
        StageOutcome::Continue(FilterState::TokenExtracted(token.to_string()))
    }
}

pub struct ValidateToken {
    codec: Arc<TokenCodec>,
}

impl ValidateToken {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl FilterStage for ValidateToken {
    fn name(&self) -> &'static str {
        "validate_token"
    }

    async fn apply(&self, _headers: &HeaderMap, state: FilterState) -> StageOutcome {
        match state {
            FilterState::TokenExtracted(raw) => match self.codec.validate(&raw) {
                Ok(verified) => StageOutcome::Continue(FilterState::TokenValidated(verified)),
                Err(e) => StageOutcome::reject(e),
            },
            other => StageOutcome::Continue(other),
        }
    }
}

pub struct CheckRevocation {
    sessions: Arc<dyn SessionStore>,
    timeout: Duration,
    on_failure: CacheFailurePolicy,
}

impl CheckRevocation {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        timeout: Duration,
        on_failure: CacheFailurePolicy,
    ) -> Self {
        Self {
            sessions,
            timeout,
            on_failure,
        }
    }

    fn degraded(&self, verified: VerifiedAccessToken, reason: &str) -> StageOutcome {
        match self.on_failure {
            CacheFailurePolicy::FailOpen => {
                warn!(
                    token_id = %verified.token_id,
                    reason,
                    "session cache unavailable; revocation check skipped"
                );
                StageOutcome::Continue(FilterState::RevocationChecked(verified))
            }
            CacheFailurePolicy::FailClosed => {
                error!(
                    token_id = %verified.token_id,
                    reason,
                    "session cache unavailable; rejecting request"
                );
                StageOutcome::Reject(AppError::Unavailable)
            }
        }
    }
}

#[async_trait]
impl FilterStage for CheckRevocation {
    fn name(&self) -> &'static str {
        "check_revocation"
    }

    async fn apply(&self, _headers: &HeaderMap, state: FilterState) -> StageOutcome {
        let FilterState::TokenValidated(verified) = state else {
            return StageOutcome::Continue(state);
        };

        match tokio::time::timeout(self.timeout, self.sessions.is_revoked(verified.token_id)).await
        {
            Ok(Ok(false)) => StageOutcome::Continue(FilterState::RevocationChecked(verified)),
            Ok(Ok(true)) => StageOutcome::reject(AuthError::Revoked),
            Ok(Err(e)) => self.degraded(verified, &e.to_string()),
            Err(_) => self.degraded(verified, "timeout"),
        }
    }
}

pub struct PopulateContext;

#[async_trait]
impl FilterStage for PopulateContext {
    fn name(&self) -> &'static str {
        "populate_context"
    }

    async fn apply(&self, _headers: &HeaderMap, state: FilterState) -> StageOutcome {
        match state {
            FilterState::RevocationChecked(verified) => {
                StageOutcome::Continue(FilterState::Authenticated(AuthCtx::from(verified)))
            }
            other => StageOutcome::Continue(other),
        }
    }
}

pub struct AuthPipeline {
    stages: Vec<Box<dyn FilterStage>>,
}

impl std::fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl AuthPipeline {
    pub fn new(stages: Vec<Box<dyn FilterStage>>) -> Self {
        Self { stages }
    }

    /// extract → validate → revocation check → context.
    ///
    /// `access_cookie`: cookie read when no bearer token is presented.
    pub fn standard(
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        cache_timeout: Duration,
        on_cache_failure: CacheFailurePolicy,
        access_cookie: Option<&'static str>,
    ) -> Self {
        let extract = match access_cookie {
            Some(name) => ExtractBearer::with_cookie(name),
            None => ExtractBearer::header_only(),
        };
        Self::new(vec![
            Box::new(extract),
            Box::new(ValidateToken::new(codec)),
            Box::new(CheckRevocation::new(
                sessions,
                cache_timeout,
                on_cache_failure,
            )),
            Box::new(PopulateContext),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// `Ok(None)`: no bearer token. `Ok(Some(_))`: authenticated. `Err(_)`: rejected.
    pub async fn run(&self, headers: &HeaderMap) -> Result<Option<AuthCtx>, AppError> {
        let mut state = FilterState::Unauthenticated;

        for stage in &self.stages {
            match stage.apply(headers, state).await {
                StageOutcome::Continue(next) => state = next,
                StageOutcome::Reject(e) => {
                    warn!(stage = stage.name(), error = %e, "request rejected");
                    return Err(e);
                }
            }
        }

        match state {
            FilterState::Authenticated(ctx) => {
                debug!(user_id = %ctx.user_id, token_id = %ctx.token_id, "request authenticated");
                Ok(Some(ctx))
            }
            FilterState::Unauthenticated => Ok(None),
            other => {
                error!(state = other.name(), "authentication pipeline ended early");
                Err(AppError::Internal)
            }
        }
    }
}
