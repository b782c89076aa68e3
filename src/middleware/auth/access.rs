//! Runs the authentication pipeline for every request on the protected router and stores
//! the resulting `AuthCtx` in request extensions.
//!
//! - No bearer token: the request continues without a context. Handlers that need one
//!   reject through `AuthCtxExtractor` (401).
//! - A token that fails any stage: the request stops here with that stage's error.
//! - An accepted token: `user_id`/`token_id` are recorded on the request span.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
};
use tracing::{Span, debug, field::display};

use crate::error::AppError;
use crate::state::AppState;

/// Apply the auth middleware to `router`.
///
/// ```ignore
/// let protected = middleware::auth::access::apply(protected_routes(), state.clone());
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8's from_fn cannot take a State extractor, so pass state explicitly
    router.route_layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth_ctx = state
        .auth_pipeline
        .run(req.headers())
        .await
        .inspect_err(|e| debug!(code = e.code(), "bearer token rejected"))?;
    if let Some(auth_ctx) = auth_ctx {
        let span = Span::current();
        span.record("user_id", display(auth_ctx.user_id));
        span.record("token_id", display(auth_ctx.token_id));
        req.extensions_mut().insert(auth_ctx);
    }

    Ok(next.run(req).await)
}
