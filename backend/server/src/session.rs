//! # Admin Sessions
//!
//! The admin API key never leaves the server after login.
//!
//! - `POST /api/admin/session` trades the key for an opaque token
//! - Token travels in an `HttpOnly`, `SameSite=Strict` cookie scoped to `/api/admin`
//! - Only the SHA-256 digest of the token is stored, with a TTL
//! - `DELETE /api/admin/session` revokes it
use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::COOKIE, request::Parts},
};
use redis::{AsyncCommands, aio::ConnectionManager};
use sha2::{Digest, Sha256};
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

use crate::{error::AppError, state::AppState, store::StoreError};

pub const SESSION_COOKIE: &str = "folio_session";

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, token: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn contains(&self, token: &str) -> Result<bool, StoreError>;

    async fn remove(&self, token: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemorySessions {
    sessions: Mutex<HashMap<String, Instant>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessions {
    async fn insert(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        sessions.retain(|_, expires_at| *expires_at > now);
        sessions.insert(digest(token), now + ttl);

        Ok(())
    }

    async fn contains(&self, token: &str) -> Result<bool, StoreError> {
        let sessions = self.sessions.lock().await;

        Ok(sessions
            .get(&digest(token))
            .is_some_and(|expires_at| *expires_at > Instant::now()))
    }

    async fn remove(&self, token: &str) -> Result<(), StoreError> {
        self.sessions.lock().await.remove(&digest(token));

        Ok(())
    }
}

pub struct RedisSessions {
    connection: ConnectionManager,
}

impl RedisSessions {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn key(token: &str) -> String {
        format!("session:{}", digest(token))
    }
}

#[async_trait]
impl SessionStore for RedisSessions {
    async fn insert(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(Self::key(token), 1, ttl.as_secs().max(1))
            .await?;

        Ok(())
    }

    async fn contains(&self, token: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();

        Ok(connection.exists(Self::key(token)).await?)
    }

    async fn remove(&self, token: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(Self::key(token)).await?;

        Ok(())
    }
}

fn digest(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Compares digests so the comparison length never depends on the input.
pub fn api_key_matches(provided: &str, expected: &str) -> bool {
    !expected.is_empty() && Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

pub fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };

    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/api/admin; Max-Age={}{secure}",
        ttl.as_secs()
    )
}

pub fn cleared_cookie(secure: bool) -> String {
    session_cookie("", Duration::ZERO, secure)
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Proof that the request carries a live admin session.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub token: String,
}

impl FromRequestParts<Arc<AppState>> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = read_cookie(&parts.headers, SESSION_COOKIE).ok_or(AppError::Unauthenticated)?;

        if !state.sessions.contains(&token).await? {
            return Err(AppError::Unauthenticated);
        }

        Ok(AdminSession { token })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_api_key_matches() {
        assert!(api_key_matches("secret", "secret"));
        assert!(!api_key_matches("Secret", "secret"));
        assert!(!api_key_matches("", ""));
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; folio_session=abc123"));

        assert_eq!(read_cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(read_cookie(&headers, "missing"), None);

        let mut empty = HeaderMap::new();
        empty.append(COOKIE, HeaderValue::from_static("folio_session="));
        assert_eq!(read_cookie(&empty, SESSION_COOKIE), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok", Duration::from_secs(60), true);

        assert!(cookie.starts_with("folio_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=60"));
        assert!(cookie.ends_with("; Secure"));
        assert!(cleared_cookie(false).contains("Max-Age=0"));
    }

    #[test]
    fn test_new_token_is_unique() {
        let token = new_token();

        assert_eq!(token.len(), 64);
        assert_ne!(token, new_token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_sessions_expire() {
        let sessions = MemorySessions::new();
        sessions.insert("token", Duration::from_secs(10)).await.unwrap();

        assert!(sessions.contains("token").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!sessions.contains("token").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_sessions_remove() {
        let sessions = MemorySessions::new();
        sessions.insert("token", Duration::from_secs(10)).await.unwrap();
        sessions.remove("token").await.unwrap();

        assert!(!sessions.contains("token").await.unwrap());
    }
}
