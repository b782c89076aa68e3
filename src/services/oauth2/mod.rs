pub mod client;
pub mod exchange;
pub mod id_token;
pub mod provider;
pub mod state_store;

pub use exchange::{CallbackParams, OAuth2Service};
pub use provider::ProviderConfig;
