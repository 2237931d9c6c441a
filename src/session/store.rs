//! Server-side session persistence.
//!
//! Stores are keyed by the SHA-256 digest of the session token, never the
//! raw token: the cookie holds the only raw copy, so leaked store contents
//! cannot be replayed as cookies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use sqlx::Row;

use crate::db::errors::Result;
use crate::session::SessionData;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the data for a token digest. Unknown and expired tokens both
    /// come back as `None`; neither is an error.
    async fn load(&self, token_hash: &str) -> Result<Option<SessionData>>;

    /// Upsert the session record, replacing any previous data and expiry.
    async fn save(&self, token_hash: &str, data: &SessionData, expiry: DateTime<Utc>) -> Result<()>;

    /// Remove the record. Deleting an absent token is not an error.
    async fn delete(&self, token_hash: &str) -> Result<()>;
}

/// In-memory store, used by the test suite.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, (SessionData, DateTime<Utc>)>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) sessions, for test assertions.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.sessions.iter().filter(|e| e.value().1 > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, token_hash: &str) -> Result<Option<SessionData>> {
        match self.sessions.get(token_hash) {
            Some(entry) if entry.value().1 > Utc::now() => Ok(Some(entry.value().0.clone())),
            _ => Ok(None),
        }
    }

    async fn save(&self, token_hash: &str, data: &SessionData, expiry: DateTime<Utc>) -> Result<()> {
        self.sessions.insert(token_hash.to_string(), (data.clone(), expiry));
        Ok(())
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        self.sessions.remove(token_hash);
        Ok(())
    }
}

/// PostgreSQL-backed store. Expired rows are ignored on load and reaped
/// opportunistically on save.
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, token_hash: &str) -> Result<Option<SessionData>> {
        let row = sqlx::query("SELECT data FROM sessions WHERE token_hash = $1 AND expiry > now()")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.try_get("data").map_err(anyhow::Error::from)?;
                let data: SessionData = serde_json::from_value(data).map_err(anyhow::Error::from)?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, token_hash: &str, data: &SessionData, expiry: DateTime<Utc>) -> Result<()> {
        let data = serde_json::to_value(data).map_err(anyhow::Error::from)?;
        sqlx::query(
            "INSERT INTO sessions (token_hash, data, expiry) VALUES ($1, $2, $3) \
             ON CONFLICT (token_hash) DO UPDATE SET data = $2, expiry = $3",
        )
        .bind(token_hash)
        .bind(data)
        .bind(expiry)
        .execute(&self.pool)
        .await?;

        // Reap a batch of expired rows while we are here
        sqlx::query("DELETE FROM sessions WHERE expiry <= now()")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn data_with(key: &str, value: &str) -> SessionData {
        let mut data = SessionData::new();
        data.insert(key.to_string(), serde_json::json!(value));
        data
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        let expiry = Utc::now() + Duration::hours(1);

        store.save("abc", &data_with("flash", "hello"), expiry).await.unwrap();
        let loaded = store.load("abc").await.unwrap().unwrap();
        assert_eq!(loaded.get("flash"), Some(&serde_json::json!("hello")));

        store.delete("abc").await.unwrap();
        assert!(store.load("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_records_are_invisible() {
        let store = MemorySessionStore::new();
        let expiry = Utc::now() - Duration::seconds(1);

        store.save("stale", &data_with("k", "v"), expiry).await.unwrap();
        assert!(store.load("stale").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unknown_token_is_not_an_error() {
        let store = MemorySessionStore::new();
        assert!(store.load("never-seen").await.unwrap().is_none());
        store.delete("never-seen").await.unwrap();
    }
}
