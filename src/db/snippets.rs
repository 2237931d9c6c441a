//! Snippet storage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::types::SnippetId;

/// A published snippet. Snippets past their expiry are treated as gone.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Snippet {
    pub id: SnippetId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SnippetStore: Send + Sync {
    /// Insert a snippet expiring `expires_days` from now.
    async fn create(&self, title: &str, content: &str, expires_days: i64) -> Result<Snippet>;

    /// Fetch a snippet by id. Expired and unknown ids both come back as
    /// `None`.
    async fn get(&self, id: SnippetId) -> Result<Option<Snippet>>;

    /// The ten most recently created, non-expired snippets.
    async fn latest(&self) -> Result<Vec<Snippet>>;
}

/// PostgreSQL-backed snippet store.
pub struct PgSnippets {
    pool: PgPool,
}

impl PgSnippets {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnippetStore for PgSnippets {
    async fn create(&self, title: &str, content: &str, expires_days: i64) -> Result<Snippet> {
        let snippet = sqlx::query_as::<_, Snippet>(
            "INSERT INTO snippets (id, title, content, created_at, expires_at) \
             VALUES ($1, $2, $3, now(), now() + make_interval(days => $4::int)) \
             RETURNING id, title, content, created_at, expires_at",
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(content)
        .bind(expires_days)
        .fetch_one(&self.pool)
        .await?;

        Ok(snippet)
    }

    async fn get(&self, id: SnippetId) -> Result<Option<Snippet>> {
        let snippet = sqlx::query_as::<_, Snippet>(
            "SELECT id, title, content, created_at, expires_at \
             FROM snippets WHERE id = $1 AND expires_at > now()",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snippet)
    }

    async fn latest(&self) -> Result<Vec<Snippet>> {
        let snippets = sqlx::query_as::<_, Snippet>(
            "SELECT id, title, content, created_at, expires_at \
             FROM snippets WHERE expires_at > now() \
             ORDER BY created_at DESC LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(snippets)
    }
}

/// In-memory snippet store, used by the test suite.
#[derive(Default)]
pub struct MemorySnippets {
    snippets: DashMap<SnippetId, Snippet>,
}

impl MemorySnippets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a snippet that expired in the past, for edge-case tests.
    pub fn insert_expired(&self, title: &str, content: &str) -> Snippet {
        let snippet = Snippet {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: Utc::now() - Duration::days(2),
            expires_at: Utc::now() - Duration::days(1),
        };
        self.snippets.insert(snippet.id, snippet.clone());
        snippet
    }
}

#[async_trait]
impl SnippetStore for MemorySnippets {
    async fn create(&self, title: &str, content: &str, expires_days: i64) -> Result<Snippet> {
        let now = Utc::now();
        let snippet = Snippet {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            expires_at: now + Duration::days(expires_days),
        };
        self.snippets.insert(snippet.id, snippet.clone());
        Ok(snippet)
    }

    async fn get(&self, id: SnippetId) -> Result<Option<Snippet>> {
        Ok(self
            .snippets
            .get(&id)
            .filter(|s| s.value().expires_at > Utc::now())
            .map(|s| s.value().clone()))
    }

    async fn latest(&self) -> Result<Vec<Snippet>> {
        let now = Utc::now();
        let mut snippets: Vec<Snippet> = self
            .snippets
            .iter()
            .filter(|s| s.value().expires_at > now)
            .map(|s| s.value().clone())
            .collect();
        snippets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snippets.truncate(10);
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_snippets_are_invisible() {
        let store = MemorySnippets::new();
        let live = store.create("live", "content", 7).await.unwrap();
        let dead = store.insert_expired("dead", "content");

        assert!(store.get(live.id).await.unwrap().is_some());
        assert!(store.get(dead.id).await.unwrap().is_none());

        let latest = store.latest().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, live.id);
    }

    #[tokio::test]
    async fn latest_is_newest_first_capped_at_ten() {
        let store = MemorySnippets::new();
        for i in 0..12 {
            store.create(&format!("snippet {i}"), "content", 365).await.unwrap();
            // Keep created_at ordering deterministic
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let latest = store.latest().await.unwrap();
        assert_eq!(latest.len(), 10);
        assert_eq!(latest[0].title, "snippet 11");
        assert!(latest.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }
}
