//! Argon2id password hashing (PHC string format).
use argon2::{
    Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version,
    password_hash::{PasswordHash, SaltString},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("random source unavailable: {0}")]
    Random(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Hashes and verifies passwords.
///
/// Holds a dummy hash made with the same parameters, so that a lookup miss can still pay
/// for one full verification (`verify(password, None)`).
#[derive(Clone)]
pub struct Passwords {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl std::fmt::Debug for Passwords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passwords").finish_non_exhaustive()
    }
}

impl Passwords {
    /// Argon2id with the crate's default cost parameters.
    pub fn new() -> Result<Self, PasswordError> {
        Self::with_params(Params::default())
    }

    pub fn with_params(params: Params) -> Result<Self, PasswordError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_with(&argon2, "dummy-password-for-unknown-users")?;
        Ok(Self { argon2, dummy_hash })
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        hash_with(&self.argon2, password)
    }

    /// `stored_hash == None` verifies against the dummy hash and always returns `false`.
    ///
    /// Unparseable stored hashes are treated as a mismatch.
    pub fn verify(&self, password: &str, stored_hash: Option<&str>) -> bool {
        match stored_hash {
            Some(phc) => match PasswordHash::new(phc) {
                Ok(parsed) => self
                    .argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
                Err(_) => {
                    self.burn(password);
                    false
                }
            },
            None => {
                self.burn(password);
                false
            }
        }
    }

    fn burn(&self, password: &str) {
        if let Ok(parsed) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.argon2.verify_password(password.as_bytes(), &parsed);
        }
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> Result<String, PasswordError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::fill(&mut salt_bytes).map_err(|e| PasswordError::Random(e.to_string()))?;
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError::Hash(e.to_string()))?;

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::test_support::passwords;

    #[test]
    fn hash_verifies_only_the_same_password() {
        let passwords = passwords();
        let phc = passwords.hash("correct").unwrap();

        assert!(phc.starts_with("$argon2id$"));
        assert!(passwords.verify("correct", Some(&phc)));
        assert!(!passwords.verify("wrong", Some(&phc)));
    }

    #[test]
    fn same_password_hashes_differently() {
        let passwords = passwords();
        assert_ne!(
            passwords.hash("correct").unwrap(),
            passwords.hash("correct").unwrap()
        );
    }

    #[test]
    fn missing_or_garbage_hash_never_verifies() {
        let passwords = passwords();
        assert!(!passwords.verify("dummy-password-for-unknown-users", None));
        assert!(!passwords.verify("correct", Some("not-a-phc-string")));
    }
}
