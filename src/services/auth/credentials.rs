//! Credential checks: local username/password and federated identity resolution.
//!
//! Both paths end in a canonical `Principal`. Local failures are uniform
//! (`InvalidCredentials`) whether or not the username exists.
use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::repos::user_repo::{FederatedIdentity, NewFederatedUser, UserDirectory};
use crate::services::auth::{AuthError, Principal, Realm, password::Passwords};

/// What to do when a verified provider email matches an existing local account that is not
/// linked to the provider identity yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailLinkPolicy {
    /// Reject with `AccountLinkRequired`; linking must happen explicitly.
    Reject,
    /// Link the provider identity to the local account.
    Merge,
}

impl EmailLinkPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

/// Identity claims obtained from a provider after the exchange has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderClaims {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub email_policy: EmailLinkPolicy,
    // Roles for principals created on first federated login.
    pub default_roles: Vec<String>,
    // Upper bound for a local check (lookup + hash). Exceeding it is a rejection.
    pub check_timeout: Duration,
}

#[derive(Clone)]
pub struct CredentialService {
    directory: Arc<dyn UserDirectory>,
    passwords: Passwords,
    settings: CredentialSettings,
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CredentialService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        passwords: Passwords,
        settings: CredentialSettings,
    ) -> Self {
        Self {
            directory,
            passwords,
            settings,
        }
    }

    pub async fn authenticate_local(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal, AppError> {
        match tokio::time::timeout(
            self.settings.check_timeout,
            self.check_local(username, password),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.settings.check_timeout.as_millis() as u64,
                    "local credential check timed out"
                );
                Err(AuthError::InvalidCredentials.into())
            }
        }
    }

    async fn check_local(&self, username: &str, password: &str) -> Result<Principal, AppError> {
        let credential = self.directory.find_local_credential(username).await?;

        // Unknown usernames still pay for one verification against the dummy hash.
        let (stored_hash, user) = match credential {
            Some(c) => (Some(c.password_hash), Some(c.user)),
            None => (None, None),
        };

        let passwords = self.passwords.clone();
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || {
            passwords.verify(&password, stored_hash.as_deref())
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "password verification task failed");
            AppError::Internal
        })?;

        match user {
            Some(user) if matches && user.active => Ok(user.into_principal(Realm::Local)),
            Some(user) if matches => {
                debug!(user_id = %user.id, "login attempt for deactivated principal");
                Err(AuthError::InvalidCredentials.into())
            }
            _ => Err(AuthError::InvalidCredentials.into()),
        }
    }

    /// Maps a verified provider identity to a principal, creating one on first login.
    ///
    /// Repeated calls with the same `(provider, subject)` return the same principal.
    pub async fn resolve_federated(&self, claims: &ProviderClaims) -> Result<Principal, AppError> {
        if claims.provider.is_empty() || claims.subject.is_empty() {
            return Err(AuthError::ProviderError.into());
        }
        let realm = Realm::Federated(claims.provider.clone());

        if let Some(user) = self
            .directory
            .find_by_federated(&claims.provider, &claims.subject)
            .await?
        {
            return active(user.into_principal(realm));
        }

        let identity = FederatedIdentity {
            provider: claims.provider.clone(),
            subject: claims.subject.clone(),
            email: claims.email.clone(),
        };

        let verified_email = claims
            .email
            .as_deref()
            .filter(|e| claims.email_verified && !e.is_empty());

        if let Some(email) = verified_email
            && let Some(local) = self.directory.find_local_by_email(email).await?
        {
            match self.settings.email_policy {
                EmailLinkPolicy::Reject => {
                    info!(
                        provider = %claims.provider,
                        user_id = %local.id,
                        "federated email matches an unlinked local account"
                    );
                    return Err(AuthError::AccountLinkRequired.into());
                }
                EmailLinkPolicy::Merge => {
                    let user = self.directory.link_federated(local.id, &identity).await?;
                    info!(
                        provider = %claims.provider,
                        user_id = %user.id,
                        "linked federated identity to local account"
                    );
                    return active(user.into_principal(realm));
                }
            }
        }

        let new_user = NewFederatedUser {
            display_name: claims
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("{}:{}", claims.provider, claims.subject)),
            roles: self.settings.default_roles.clone(),
            identity,
        };
        let user = self.directory.create_federated(&new_user).await?;
        debug!(provider = %claims.provider, user_id = %user.id, "resolved federated principal");

        active(user.into_principal(realm))
    }
}

fn active(principal: Principal) -> Result<Principal, AppError> {
    if principal.active {
        Ok(principal)
    } else {
        Err(AuthError::InvalidCredentials.into())
    }
}
