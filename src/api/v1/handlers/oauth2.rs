/*
 * Responsibility
 * - GET /oauth2/{provider}/authorize: redirect the browser to the provider
 * - GET /oauth2/{provider}/callback: finish the exchange and issue our own tokens
 *   (JSON, or a redirect to the frontend with token cookies when FRONTEND_URL is set)
 */
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use tracing::warn;

use crate::api::v1::dto::token_response::TokenResponse;
use crate::api::v1::extractors::{ApiPath, ApiQuery};
use crate::error::AppError;
use crate::services::oauth2::CallbackParams;
use crate::state::AppState;

pub async fn authorize(
    State(state): State<AppState>,
    ApiPath(provider): ApiPath<String>,
) -> Result<Redirect, AppError> {
    let url = state.oauth2.authorization_url(&provider).await?;
    Ok(Redirect::to(url.as_str()))
}

pub async fn callback(
    State(state): State<AppState>,
    ApiPath(provider): ApiPath<String>,
    ApiQuery(params): ApiQuery<CallbackParams>,
) -> Result<Response, AppError> {
    let outcome = state.oauth2.complete(&provider, &params).await;

    let Some(frontend) = state.frontend.as_deref() else {
        return outcome.map(|pair| Json(TokenResponse::from(pair)).into_response());
    };
    match outcome {
        Ok(pair) => frontend.login_succeeded(&pair),
        Err(e) => {
            warn!(%provider, code = e.code(), "oauth2 login failed; redirecting to frontend");
            frontend.login_failed(&e)
        }
    }
}
