//! Shared-password login and session tokens.
//!
//! Tokens are issued and revoked here but no other operation checks them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use parley_protocol::ErrorCode;

/// Number of random bytes in a token (rendered as hex).
const TOKEN_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid password")]
    Unauthenticated,

    #[error("name must not be empty")]
    EmptyName,

    #[error("unknown token: {0}")]
    TokenNotFound(String),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::EmptyName => ErrorCode::InvalidArgument,
            Self::TokenNotFound(_) => ErrorCode::NotFound,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    name: String,
    issued_at: DateTime<Utc>,
}

/// Maps issued tokens to the name that logged in.
#[derive(Clone)]
pub struct TokenStore {
    password: Arc<str>,
    tokens: Arc<RwLock<HashMap<String, Session>>>,
}

impl TokenStore {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Arc::from(password.into()),
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Checks the shared password, then the name, and issues a fresh token.
    pub async fn login(&self, name: &str, password: &str) -> Result<String, AuthError> {
        if password != &*self.password {
            warn!(name, "Login rejected: wrong password");
            return Err(AuthError::Unauthenticated);
        }
        if name.trim().is_empty() {
            return Err(AuthError::EmptyName);
        }

        let mut tokens = self.tokens.write().await;
        let token = loop {
            let candidate = generate_token();
            if !tokens.contains_key(&candidate) {
                break candidate;
            }
        };
        tokens.insert(
            token.clone(),
            Session {
                name: name.to_string(),
                issued_at: Utc::now(),
            },
        );

        info!(name, "Login succeeded");
        Ok(token)
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let session = self
            .tokens
            .write()
            .await
            .remove(token)
            .ok_or_else(|| AuthError::TokenNotFound(token.to_string()))?;

        let held_secs = (Utc::now() - session.issued_at).num_seconds();
        info!(name = %session.name, held_secs, "Logged out");
        Ok(())
    }

    /// Name the token was issued to, if it is still valid.
    ///
    /// This is the lookup an authenticated operation would use to resolve a
    /// caller. Nothing in the broker requires a token yet.
    pub async fn name_for(&self, token: &str) -> Option<String> {
        self.tokens
            .read()
            .await
            .get(token)
            .map(|session| session.name.clone())
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_login_issues_hex_token() {
        let store = TokenStore::new("nada");

        let token = store.login("alice", "nada").await.unwrap();

        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(store.name_for(&token).await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_password_checked_before_name() {
        let store = TokenStore::new("nada");

        assert_eq!(store.login("", "wrong").await, Err(AuthError::Unauthenticated));
        assert_eq!(store.login("", "nada").await, Err(AuthError::EmptyName));
        assert_eq!(AuthError::EmptyName.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_logout() {
        let store = TokenStore::new("nada");
        let token = store.login("alice", "nada").await.unwrap();

        store.logout(&token).await.unwrap();

        assert!(store.name_for(&token).await.is_none());
        assert_eq!(
            store.logout(&token).await,
            Err(AuthError::TokenNotFound(token.clone()))
        );
    }

    #[tokio::test]
    async fn test_tokens_are_distinct() {
        let store = TokenStore::new("nada");
        let a = store.login("alice", "nada").await.unwrap();
        let b = store.login("alice", "nada").await.unwrap();
        assert_ne!(a, b);
    }
}
