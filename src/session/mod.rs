//! Server-side sessions with opaque bearer tokens.
//!
//! The browser holds a random 256-bit token in an HttpOnly cookie; all state
//! lives server-side, keyed by the token's SHA-256 digest. Sessions are
//! loaded once at the start of a request and written back once at the end,
//! and only when something actually changed. Requests presenting the same
//! token are serialized behind a per-token async lock so read-modify-write
//! cycles never interleave; requests with different tokens run in parallel.

pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;

use crate::config::SessionConfig;
use crate::errors::{Error, Result};
use store::SessionStore;

/// Well-known session keys.
pub mod keys {
    /// ID of the logged-in user. Presence of this key is what makes a
    /// request authenticated.
    pub const AUTHENTICATED_USER_ID: &str = "authenticatedUserID";
    /// Path the user originally asked for before being bounced to login.
    pub const REDIRECT_PATH_AFTER_LOGIN: &str = "redirectPathAfterLogin";
    /// One-shot notification shown on the next rendered page.
    pub const FLASH: &str = "flash";
}

pub type SessionData = HashMap<String, serde_json::Value>;

/// Generate a fresh session token: 32 bytes (256 bits) of CSPRNG output,
/// base64url without padding.
pub fn generate_token() -> String {
    let mut token_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut token_bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

/// Digest a raw token for use as a storage key.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

struct SessionInner {
    token: String,
    data: SessionData,
    dirty: bool,
}

/// Handle to the current request's session. Cheap to clone; handlers get it
/// from request extensions.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    fn fresh() -> Self {
        Self::build(generate_token(), SessionData::new(), false)
    }

    fn existing(token: &str, data: SessionData) -> Self {
        Self::build(token.to_string(), data, false)
    }

    fn build(token: String, data: SessionData, dirty: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner { token, data, dirty })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // A poisoned lock just means some thread panicked mid-access; the
        // map itself is still structurally sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current token value. Changes when the session is renewed.
    pub fn token(&self) -> String {
        self.lock().token.clone()
    }

    /// Read a value. Absent keys and values of the wrong shape both come
    /// back as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let inner = self.lock();
        inner.data.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Write a value and mark the session dirty.
    pub fn put<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| Error::Internal {
            operation: format!("serialize session value for key {key}: {e}"),
        })?;
        let mut inner = self.lock();
        inner.data.insert(key.to_string(), value);
        inner.dirty = true;
        Ok(())
    }

    /// Delete a key. Marks the session dirty only if the key was present.
    pub fn remove(&self, key: &str) {
        let mut inner = self.lock();
        if inner.data.remove(key).is_some() {
            inner.dirty = true;
        }
    }

    /// Read-and-clear, for one-shot values like flash messages and the
    /// post-login redirect path.
    pub fn pop<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut inner = self.lock();
        let value = inner.data.remove(key)?;
        inner.dirty = true;
        serde_json::from_value(value).ok()
    }

    /// True once any mutation has happened this request.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    fn replace_token(&self, token: String) {
        let mut inner = self.lock();
        inner.token = token;
        inner.dirty = true;
    }

    fn snapshot(&self) -> (String, SessionData) {
        let inner = self.lock();
        (inner.token.clone(), inner.data.clone())
    }
}

type LockMap = DashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Held for the duration of a request; serializes all requests that present
/// the same session token.
pub struct SessionGuard {
    key: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release the mutex before deciding whether the map entry is dead.
        // Waiters hold clones of the Arc, so strong_count == 1 means nobody
        // else can be queued on this token.
        self.guard.take();
        self.locks.remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

/// Loads, renews and persists sessions against a [`SessionStore`].
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    locks: Arc<LockMap>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    async fn lock_token(&self, key: &str) -> SessionGuard {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        SessionGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Load the session for an incoming request. A missing, unknown or
    /// expired token yields a fresh empty session, never an error. The
    /// returned guard serializes this request against others on the same
    /// token and must be held until after [`save`](Self::save).
    pub async fn load(&self, cookie_token: Option<&str>) -> Result<(Session, SessionGuard)> {
        if let Some(token) = cookie_token {
            let key = hash_token(token);
            let guard = self.lock_token(&key).await;
            if let Some(data) = self.store.load(&key).await? {
                return Ok((Session::existing(token, data), guard));
            }
            return Ok((Session::fresh(), guard));
        }

        let session = Session::fresh();
        let guard = self.lock_token(&hash_token(&session.token())).await;
        Ok((session, guard))
    }

    /// Rotate the session token, keeping the data. The old server-side
    /// record is destroyed so the previous cookie value is dead from this
    /// point on. Mandatory on every privilege transition.
    pub async fn renew_token(&self, session: &Session) -> Result<()> {
        let old_key = hash_token(&session.token());
        self.store.delete(&old_key).await?;
        session.replace_token(generate_token());
        Ok(())
    }

    /// Persist the session if it was touched this request. Returns the
    /// `Set-Cookie` value to send when a write happened, `None` otherwise.
    pub async fn save(&self, session: &Session) -> Result<Option<String>> {
        if !session.is_dirty() {
            return Ok(None);
        }

        let (token, data) = session.snapshot();
        let expiry = Utc::now()
            + chrono::Duration::from_std(self.config.lifetime).map_err(|e| Error::Internal {
                operation: format!("compute session expiry: {e}"),
            })?;
        self.store.save(&hash_token(&token), &data, expiry).await?;

        Ok(Some(self.cookie_value(&token)))
    }

    fn cookie_value(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}",
            self.config.cookie_name,
            token,
            self.config.cookie_same_site,
            self.config.lifetime.as_secs()
        );
        if self.config.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

impl<S> axum::extract::FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self> {
        parts.extensions.get::<Session>().cloned().ok_or_else(|| Error::Internal {
            operation: "access session outside the session middleware".to_string(),
        })
    }
}

/// Pull the session token out of a request's `Cookie` header.
pub fn token_from_headers(headers: &axum::http::HeaderMap, cookie_name: &str) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for cookie in cookies.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=') {
            if name == cookie_name && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemorySessionStore;
    use std::time::Duration;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemorySessionStore::new()), SessionConfig::default())
    }

    #[test]
    fn tokens_are_distinct_and_unpadded() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(t1.len(), 43);
        assert!(!t1.contains('='));
    }

    #[test]
    fn typed_access_and_pop() {
        let session = Session::fresh();
        assert!(!session.is_dirty());

        session.put(keys::FLASH, "saved!").unwrap();
        assert!(session.is_dirty());
        assert_eq!(session.get::<String>(keys::FLASH).as_deref(), Some("saved!"));

        // pop clears the key
        assert_eq!(session.pop::<String>(keys::FLASH).as_deref(), Some("saved!"));
        assert_eq!(session.pop::<String>(keys::FLASH), None);

        // wrong-shape reads are None, not errors
        session.put("count", 7).unwrap();
        assert_eq!(session.get::<String>("count"), None);
        assert_eq!(session.get::<i64>("count"), Some(7));
    }

    #[test]
    fn remove_only_dirties_when_present() {
        let session = Session::fresh();
        session.remove("absent");
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn untouched_sessions_are_not_persisted() {
        let mgr = manager();
        let (session, _guard) = mgr.load(None).await.unwrap();
        assert!(mgr.save(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_and_reload_roundtrip() {
        let mgr = manager();
        let (session, guard) = mgr.load(None).await.unwrap();
        session.put("name", "alice").unwrap();
        let cookie = mgr.save(&session).await.unwrap().unwrap();
        assert!(cookie.contains("HttpOnly"));
        let token = session.token();
        drop(guard);

        let (reloaded, _guard) = mgr.load(Some(&token)).await.unwrap();
        assert_eq!(reloaded.get::<String>("name").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn renew_changes_token_and_keeps_data() {
        let mgr = manager();
        let (session, guard) = mgr.load(None).await.unwrap();
        session.put("name", "alice").unwrap();
        mgr.save(&session).await.unwrap();
        let old_token = session.token();

        mgr.renew_token(&session).await.unwrap();
        let new_token = session.token();
        assert_ne!(old_token, new_token);
        assert_eq!(session.get::<String>("name").as_deref(), Some("alice"));
        mgr.save(&session).await.unwrap();
        drop(guard);

        // old token is dead, new one resolves
        let (via_old, _g1) = mgr.load(Some(&old_token)).await.unwrap();
        assert_eq!(via_old.get::<String>("name"), None);
        drop(_g1);
        let (via_new, _g2) = mgr.load(Some(&new_token)).await.unwrap();
        assert_eq!(via_new.get::<String>("name").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn same_token_requests_serialize() {
        let mgr = manager();
        let (session, guard) = mgr.load(None).await.unwrap();
        session.put("k", 1).unwrap();
        mgr.save(&session).await.unwrap();
        let token = session.token();

        // A second load on the same token must wait for the guard
        let mgr2 = mgr.clone();
        let token2 = token.clone();
        let pending = tokio::spawn(async move { mgr2.load(Some(&token2)).await.unwrap().0.get::<i64>("k") });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        drop(guard);
        assert_eq!(pending.await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn different_tokens_run_in_parallel() {
        let mgr = manager();
        let (_s1, _guard1) = mgr.load(None).await.unwrap();
        // Holding the first guard must not block an unrelated session
        let loaded = tokio::time::timeout(Duration::from_secs(1), mgr.load(None)).await;
        assert!(loaded.is_ok());
    }

    #[test]
    fn cookie_attributes_follow_config() {
        let mgr = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            SessionConfig {
                cookie_secure: true,
                ..SessionConfig::default()
            },
        );
        let cookie = mgr.cookie_value("tok");
        assert!(cookie.starts_with("snipbox_session=tok; Path=/; HttpOnly; SameSite=Lax"));
        assert!(cookie.ends_with("; Secure"));
    }

    #[test]
    fn token_header_parsing() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "other=1; snipbox_session=abc123; theme=dark".parse().unwrap(),
        );
        assert_eq!(token_from_headers(&headers, "snipbox_session").as_deref(), Some("abc123"));
        assert_eq!(token_from_headers(&headers, "missing"), None);
    }
}
