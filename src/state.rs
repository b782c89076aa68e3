/*
 * Responsibility
 * - Shared context handed to every handler and to the auth middleware
 * - Cheap to clone: services are behind Arc, the cache is a handle
 */
use std::sync::Arc;

use crate::api::v1::frontend::FrontendRedirect;
use crate::middleware::auth::AuthPipeline;
use crate::services::auth::{credentials::CredentialService, token_service::TokenService};
use crate::services::cache::Cache;
use crate::services::oauth2::OAuth2Service;

#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: Cache,
    pub credentials: Arc<CredentialService>,
    pub tokens: Arc<TokenService>,
    pub oauth2: Arc<OAuth2Service>,
    pub auth_pipeline: Arc<AuthPipeline>,
    // Set when browser logins end on a frontend (tokens travel as cookies).
    pub frontend: Option<Arc<FrontendRedirect>>,
}
