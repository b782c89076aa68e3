/*
 * Responsibility
 * - POST /auth/login, /auth/refresh (public)
 * - POST /auth/logout (bearer or access token cookie)
 */
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::api::v1::dto::{
    auth::{LoginRequest, LogoutRequest, RefreshRequest},
    token_response::TokenResponse,
};
use crate::api::v1::extractors::{ApiJson, AuthCtxExtractor, optional_json};
use crate::api::v1::frontend::{REFRESH_TOKEN_COOKIE, read_cookie};
use crate::error::AppError;
use crate::state::AppState;

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    req.validate()?;

    let principal = state
        .credentials
        .authenticate_local(req.username.trim(), &req.password)
        .await?;
    let pair = state.tokens.issue_token_pair(&principal).await?;

    info!(user_id = %principal.id, token_id = %pair.token_id, "local login");
    Ok(Json(pair.into()))
}

/// The refresh token comes from the body, or from the refresh cookie of a browser login.
/// A cookie-borne refresh gets its rotated tokens back as cookies too.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: RefreshRequest = optional_json(&body)?;

    if let Some(token) = req.token() {
        let pair = state.tokens.refresh(token).await?;
        return Ok(Json(TokenResponse::from(pair)).into_response());
    }

    let frontend = state.frontend.as_deref();
    let Some((frontend, token)) =
        frontend.and_then(|f| read_cookie(&headers, REFRESH_TOKEN_COOKIE).map(|t| (f, t)))
    else {
        return Err(AppError::bad_request(
            "INVALID_REQUEST",
            "refresh_token is required",
        ));
    };

    let pair = state.tokens.refresh(&token).await?;
    let mut response = Json(TokenResponse::from(pair.clone())).into_response();
    frontend.attach_tokens(&mut response, &pair)?;
    Ok(response)
}

/// Revokes the presented access token and, when given, drops the refresh token too.
/// The body is optional; browser logins also get their token cookies cleared.
pub async fn logout(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: LogoutRequest = optional_json(&body)?;
    let frontend = state.frontend.as_deref();

    let refresh_token = req.refresh_token.or_else(|| {
        frontend.and_then(|_| read_cookie(&headers, REFRESH_TOKEN_COOKIE))
    });

    state
        .tokens
        .logout(ctx.token_id, refresh_token.as_deref())
        .await?;

    info!(user_id = %ctx.user_id, token_id = %ctx.token_id, "logout");
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(frontend) = frontend {
        frontend.clear_tokens(&mut response)?;
    }
    Ok(response)
}
