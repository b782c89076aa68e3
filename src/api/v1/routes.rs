/*
 * Responsibility
 * - URL layout of v1
 * - Public routes never pass through the auth middleware; protected routes always do
 */
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::v1::handlers::{
    admin::revoke_session,
    auth::{login, logout, refresh},
    me::me,
    oauth2::{authorize, callback},
};
use crate::middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/oauth2/{provider}/authorize", get(authorize))
        .route("/oauth2/{provider}/callback", get(callback));

    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .route("/me", get(me))
        .route("/admin/sessions/{token_id}/revoke", post(revoke_session));

    public.merge(middleware::auth::access::apply(protected, state))
}
