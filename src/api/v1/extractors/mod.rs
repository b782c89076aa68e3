pub mod auth_ctx;
pub mod request;

pub use auth_ctx::{AuthCtx, AuthCtxExtractor};
pub use request::{ApiJson, ApiPath, ApiQuery, optional_json};
