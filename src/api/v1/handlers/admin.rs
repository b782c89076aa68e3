/*
 * Responsibility
 * - Administrative session revocation (ADMIN role)
 */
use axum::{extract::State, http::StatusCode};
use tracing::info;
use uuid::Uuid;

use crate::api::v1::extractors::{ApiPath, AuthCtxExtractor};
use crate::error::AppError;
use crate::state::AppState;

pub const ADMIN_ROLE: &str = "ADMIN";

/// POST /admin/sessions/{token_id}/revoke
///
/// Unknown or already expired sessions are a no-op; the response is 204 either way.
pub async fn revoke_session(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
    ApiPath(token_id): ApiPath<Uuid>,
) -> Result<StatusCode, AppError> {
    ctx.require_role(ADMIN_ROLE)?;

    let revoked = state.tokens.revoke(token_id).await?;
    info!(admin_id = %ctx.user_id, %token_id, revoked, "session revocation requested");

    Ok(StatusCode::NO_CONTENT)
}
