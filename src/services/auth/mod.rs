pub mod credentials;
pub mod error;
pub mod factory;
pub mod password;
pub mod principal;
pub mod refresh_token;
pub mod session;
pub mod token_codec;
pub mod token_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::AuthError;
pub use principal::{Principal, Realm};
