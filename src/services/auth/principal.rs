//! Canonical authenticated identity shared by every login path.
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Realm that vouched for a principal on a given login.
///
/// Serialized as `"local"` or the provider name (e.g. `"google"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Realm {
    Local,
    Federated(String),
}

impl Realm {
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() || s == "local" {
            Realm::Local
        } else {
            Realm::Federated(s)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Realm::Local => "local",
            Realm::Federated(provider) => provider,
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Realm {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Realm {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Realm::parse(&s))
    }
}

/// Canonical identity.
///
/// - `id` is the stable subject (`sub`) used in tokens.
/// - `roles` are upper-case role names (`USER`, `ADMIN`).
/// - `active == false` means deactivated; principals are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    pub roles: Vec<String>,
    pub realm: Realm,
    pub active: bool,
}

impl Principal {
    /// Same principal, as seen through another login realm.
    pub fn with_realm(mut self, realm: Realm) -> Self {
        self.realm = realm;
        self
    }
}

/// Normalizes a role list: trimmed, upper-cased, de-duplicated, order kept.
pub fn normalize_roles<I, S>(roles: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for role in roles {
        let role = role.as_ref().trim().to_ascii_uppercase();
        if !role.is_empty() && !out.contains(&role) {
            out.push(role);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_round_trips_through_strings() {
        assert_eq!(Realm::parse("LOCAL"), Realm::Local);
        assert_eq!(Realm::parse(""), Realm::Local);
        assert_eq!(Realm::parse("Google"), Realm::Federated("google".into()));
        assert_eq!(Realm::Federated("kakao".into()).to_string(), "kakao");
    }

    #[test]
    fn roles_are_normalized() {
        assert_eq!(
            normalize_roles([" user", "ADMIN", "User", ""]),
            vec!["USER".to_string(), "ADMIN".to_string()]
        );
    }
}
