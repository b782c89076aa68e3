//! In-memory `UserDirectory` for tests.
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::repos::user_repo::{
    FederatedIdentity, LocalCredentialRow, NewFederatedUser, UserDirectory, UserRow,
};

#[derive(Default)]
struct Tables {
    users: Vec<(UserRow, Option<String>)>,
    identities: HashMap<(String, String), Uuid>,
}

#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local(
        &self,
        id: Uuid,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
        roles: &[&str],
    ) -> UserRow {
        let row = UserRow {
            id,
            username: Some(username.to_string()),
            email: email.map(str::to_string),
            display_name: username.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            realm: "local".to_string(),
            active: true,
        };
        self.tables
            .lock()
            .users
            .push((row.clone(), Some(password_hash.to_string())));
        row
    }

    pub fn deactivate(&self, id: Uuid) {
        let mut tables = self.tables.lock();
        if let Some((row, _)) = tables.users.iter_mut().find(|(u, _)| u.id == id) {
            row.active = false;
        }
    }

    pub fn user_count(&self) -> usize {
        self.tables.lock().users.len()
    }

    fn user(tables: &Tables, id: Uuid) -> Option<UserRow> {
        tables
            .users
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.clone())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_local_credential(&self, username: &str) -> RepoResult<Option<LocalCredentialRow>> {
        let tables = self.tables.lock();
        Ok(tables.users.iter().find_map(|(u, hash)| {
            match (u.username.as_deref(), hash) {
                (Some(name), Some(hash)) if name == username => Some(LocalCredentialRow {
                    user: u.clone(),
                    password_hash: hash.clone(),
                }),
                _ => None,
            }
        }))
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<UserRow>> {
        Ok(Self::user(&self.tables.lock(), id))
    }

    async fn find_by_federated(
        &self,
        provider: &str,
        subject: &str,
    ) -> RepoResult<Option<UserRow>> {
        let tables = self.tables.lock();
        Ok(tables
            .identities
            .get(&(provider.to_string(), subject.to_string()))
            .and_then(|id| Self::user(&tables, *id)))
    }

    async fn find_local_by_email(&self, email: &str) -> RepoResult<Option<UserRow>> {
        let tables = self.tables.lock();
        Ok(tables
            .users
            .iter()
            .find(|(u, hash)| {
                hash.is_some()
                    && u.email
                        .as_deref()
                        .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .map(|(u, _)| u.clone()))
    }

    async fn link_federated(
        &self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> RepoResult<UserRow> {
        let mut tables = self.tables.lock();
        let owner = *tables
            .identities
            .entry((identity.provider.clone(), identity.subject.clone()))
            .or_insert(user_id);
        Self::user(&tables, owner).ok_or(RepoError::Inconsistent("federated identity without owner"))
    }

    async fn create_federated(&self, new_user: &NewFederatedUser) -> RepoResult<UserRow> {
        let identity = &new_user.identity;
        let key = (identity.provider.clone(), identity.subject.clone());

        let mut tables = self.tables.lock();
        if let Some(owner) = tables.identities.get(&key).copied() {
            return Self::user(&tables, owner)
                .ok_or(RepoError::Inconsistent("federated identity without owner"));
        }

        let row = UserRow {
            id: Uuid::new_v4(),
            username: None,
            email: identity.email.clone(),
            display_name: new_user.display_name.clone(),
            roles: new_user.roles.clone(),
            realm: identity.provider.clone(),
            active: true,
        };
        tables.users.push((row.clone(), None));
        tables.identities.insert(key, row.id);
        Ok(row)
    }
}
