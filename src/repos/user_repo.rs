/*
 * Responsibility
 * - users / federated_identities テーブル向け SQLx 操作
 * - 認証に必要な参照と、federated identity の冪等な作成・紐付け
 */
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::{Principal, Realm, principal::normalize_roles};

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
    pub roles: Vec<String>,
    pub realm: String,
    pub active: bool,
}

impl UserRow {
    /// The principal as seen through the realm of the current login.
    pub fn into_principal(self, realm: Realm) -> Principal {
        Principal {
            id: self.id,
            name: self.display_name,
            roles: normalize_roles(&self.roles),
            realm,
            active: self.active,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct LocalCredentialRow {
    #[sqlx(flatten)]
    pub user: UserRow,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewFederatedUser {
    pub identity: FederatedIdentity,
    pub display_name: String,
    pub roles: Vec<String>,
}

/// User directory as seen by the credential checks.
///
/// `create_federated` and `link_federated` are idempotent per `(provider, subject)`: when
/// the identity already exists (e.g. a concurrent login won the race), they return the
/// user it points to and write nothing.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_local_credential(&self, username: &str) -> RepoResult<Option<LocalCredentialRow>>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<UserRow>>;

    async fn find_by_federated(&self, provider: &str, subject: &str)
    -> RepoResult<Option<UserRow>>;

    // Local accounts only (those with a password), compared case-insensitively.
    async fn find_local_by_email(&self, email: &str) -> RepoResult<Option<UserRow>>;

    async fn link_federated(&self, user_id: Uuid, identity: &FederatedIdentity)
    -> RepoResult<UserRow>;

    async fn create_federated(&self, new_user: &NewFederatedUser) -> RepoResult<UserRow>;
}

#[derive(Clone, Debug)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn owner_of(&self, identity: &FederatedIdentity) -> RepoResult<UserRow> {
        self.find_by_federated(&identity.provider, &identity.subject)
            .await?
            .ok_or(RepoError::Inconsistent("federated identity without owner"))
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_local_credential(&self, username: &str) -> RepoResult<Option<LocalCredentialRow>> {
        let row = sqlx::query_as::<_, LocalCredentialRow>(
            r#"
            SELECT id, username, email, display_name, roles, realm, active, password_hash
            FROM users
            WHERE username = $1 AND password_hash IS NOT NULL
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, display_name, roles, realm, active
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_federated(
        &self,
        provider: &str,
        subject: &str,
    ) -> RepoResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.username, u.email, u.display_name, u.roles, u.realm, u.active
            FROM federated_identities f
            JOIN users u ON u.id = f.user_id
            WHERE f.provider = $1 AND f.subject = $2
            "#,
        )
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_local_by_email(&self, email: &str) -> RepoResult<Option<UserRow>> {
        // Oldest account wins if the directory holds duplicates.
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, display_name, roles, realm, active
            FROM users
            WHERE lower(email) = lower($1) AND password_hash IS NOT NULL
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn link_federated(
        &self,
        user_id: Uuid,
        identity: &FederatedIdentity,
    ) -> RepoResult<UserRow> {
        sqlx::query(
            r#"
            INSERT INTO federated_identities (provider, subject, user_id, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, subject) DO NOTHING
            "#,
        )
        .bind(&identity.provider)
        .bind(&identity.subject)
        .bind(user_id)
        .bind(identity.email.as_deref())
        .execute(&self.pool)
        .await?;

        self.owner_of(identity).await
    }

    async fn create_federated(&self, new_user: &NewFederatedUser) -> RepoResult<UserRow> {
        let identity = &new_user.identity;
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, email, display_name, roles, realm)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, email, display_name, roles, realm, active
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(identity.email.as_deref())
        .bind(&new_user.display_name)
        .bind(&new_user.roles)
        .bind(&identity.provider)
        .fetch_one(&mut *tx)
        .await?;

        // The primary key on (provider, subject) decides concurrent first logins.
        let inserted = sqlx::query(
            r#"
            INSERT INTO federated_identities (provider, subject, user_id, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, subject) DO NOTHING
            "#,
        )
        .bind(&identity.provider)
        .bind(&identity.subject)
        .bind(user.id)
        .bind(identity.email.as_deref())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return self.owner_of(identity).await;
        }

        tx.commit().await?;
        Ok(user)
    }
}
