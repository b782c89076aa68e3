use axum::Json;

use crate::api::v1::dto::token_response::MeResponse;
use crate::api::v1::extractors::AuthCtxExtractor;

/// GET /me: the caller as seen by the security context. No store lookups.
pub async fn me(AuthCtxExtractor(ctx): AuthCtxExtractor) -> Json<MeResponse> {
    Json(ctx.into())
}
