// src/auth.rs
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::errors::{CodeboxError, Result};

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(serde::Serialize, Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Issues and checks opaque bearer tokens for the configured users.
#[derive(Clone)]
pub struct TokenStore {
    config: Arc<AuthConfig>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl TokenStore {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse> {
        match self.config.users.get(username) {
            Some(expected) if expected == password => {}
            _ => {
                log::warn!("Rejected login for user '{}'", username);
                return Err(CodeboxError::InvalidCredentials);
            }
        }

        let ttl = Duration::minutes(self.config.token_ttl_minutes);
        let token = Uuid::new_v4().simple().to_string();
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(
            token.clone(),
            Session {
                username: username.to_string(),
                expires_at: now + ttl,
            },
        );
        log::info!("Issued access token for '{}'", username);

        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer".to_string(),
            expires_in: ttl.num_seconds(),
        })
    }

    /// Resolves a bearer token to its session. Always succeeds with an
    /// anonymous session when auth is disabled.
    pub async fn authorize(&self, token: Option<&str>) -> Result<Session> {
        if !self.enabled() {
            return Ok(Session {
                username: "anonymous".to_string(),
                expires_at: DateTime::<Utc>::MAX_UTC,
            });
        }

        let token = token.ok_or(CodeboxError::Unauthorized)?;
        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Ok(session.clone()),
            _ => Err(CodeboxError::Unauthorized),
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl_minutes: i64) -> TokenStore {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "secret".to_string());
        TokenStore::new(AuthConfig { users, token_ttl_minutes: ttl_minutes })
    }

    #[tokio::test]
    async fn test_login_and_authorize() {
        let store = store(30);
        let token = store.login("alice", "secret").await.unwrap();
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expires_in, 30 * 60);

        let session = store.authorize(Some(&token.access_token)).await.unwrap();
        assert_eq!(session.username, "alice");
    }

    #[tokio::test]
    async fn test_bad_credentials_and_tokens() {
        let store = store(30);
        assert!(matches!(store.login("alice", "wrong").await, Err(CodeboxError::InvalidCredentials)));
        assert!(matches!(store.login("mallory", "secret").await, Err(CodeboxError::InvalidCredentials)));
        assert!(matches!(store.authorize(None).await, Err(CodeboxError::Unauthorized)));
        assert!(matches!(store.authorize(Some("nope")).await, Err(CodeboxError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let store = store(0);
        let token = store.login("alice", "secret").await.unwrap();
        assert!(matches!(store.authorize(Some(&token.access_token)).await, Err(CodeboxError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_disabled_auth_lets_everyone_in() {
        let store = TokenStore::new(AuthConfig::default());
        assert!(!store.enabled());
        assert_eq!(store.authorize(None).await.unwrap().username, "anonymous");
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer   abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer")), None);
        assert_eq!(bearer_token(None), None);
    }
}
