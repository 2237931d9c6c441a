//! User account storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::errors::{DbError, Result};
use crate::types::UserId;

/// A registered user account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// PHC-format Argon2id record; never rendered anywhere
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new account. A duplicate email surfaces as
    /// [`DbError::UniqueViolation`] on the users email constraint.
    async fn create(&self, name: &str, email: &str, password_hash: &str) -> Result<User>;

    /// Fetch by id. `None` for unknown ids.
    async fn get(&self, id: UserId) -> Result<Option<User>>;

    /// Fetch by email, for credential checks.
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Replace the stored password record.
    async fn update_password_hash(&self, id: UserId, password_hash: &str) -> Result<()>;
}

/// PostgreSQL-backed user store.
pub struct PgUsers {
    pool: PgPool,
}

impl PgUsers {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUsers {
    async fn create(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, password_hash, created_at) \
             VALUES ($1, $2, $3, $4, now()) \
             RETURNING id, name, email, password_hash, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update_password_hash(&self, id: UserId, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

/// In-memory user store, used by the test suite.
#[derive(Default)]
pub struct MemoryUsers {
    users: DashMap<UserId, User>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a user, simulating account deletion while sessions still
    /// reference the id.
    pub fn delete(&self, id: UserId) {
        self.users.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn create(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        if self.users.iter().any(|u| u.value().email == email) {
            return Err(DbError::UniqueViolation {
                constraint: Some("users_email_key".to_string()),
                table: Some("users".to_string()),
                message: format!("duplicate email {email}"),
            });
        }

        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.iter().find(|u| u.value().email == email).map(|u| u.value().clone()))
    }

    async fn update_password_hash(&self, id: UserId, password_hash: &str) -> Result<()> {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.password_hash = password_hash.to_string();
                Ok(())
            }
            None => Err(DbError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_email_is_a_unique_violation() {
        let store = MemoryUsers::new();
        store.create("Alice", "alice@example.com", "hash1").await.unwrap();

        let err = store.create("Other Alice", "alice@example.com", "hash2").await.unwrap_err();
        assert!(err.is_duplicate_email("users"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn deleted_users_are_gone() {
        let store = MemoryUsers::new();
        let user = store.create("Bob", "bob@example.com", "hash").await.unwrap();
        assert!(store.get(user.id).await.unwrap().is_some());

        store.delete(user.id);
        assert!(store.get(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn password_update_requires_existing_user() {
        let store = MemoryUsers::new();
        let missing = store.update_password_hash(Uuid::new_v4(), "new").await;
        assert!(matches!(missing, Err(DbError::NotFound)));

        let user = store.create("Cara", "cara@example.com", "old").await.unwrap();
        store.update_password_hash(user.id, "new").await.unwrap();
        let fetched = store.get(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.password_hash, "new");
    }
}
