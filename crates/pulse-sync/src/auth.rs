//! Authentication hooks.
//!
//! The client never stores credentials itself: it asks an [`AuthProvider`]
//! for a token on every connect and when the server requests a refresh.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{AuthErrorKind, SyncError, SyncResult};

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Token for the next handshake. `None` aborts the connect.
    async fn get_token(&self) -> Option<String>;

    /// Obtains a fresh token after the server signalled expiry.
    async fn refresh_token(&self) -> SyncResult<String> {
        Err(SyncError::auth(
            AuthErrorKind::Failed,
            "token refresh is not supported by this provider",
        ))
    }

    /// Called when refresh failed and the session can't continue.
    async fn on_token_expired(&self) {}

    /// Called after a refreshed token was pushed to the server.
    async fn on_token_refresh(&self, _token: &str) {}
}

/// Provider backed by a token the application sets directly.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        StaticTokenProvider {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Provider with no token; connects fail until one is set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn current(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_token(&self) -> Option<String> {
        self.current()
    }

    /// Re-issues the current token; fails once it has been cleared.
    async fn refresh_token(&self) -> SyncResult<String> {
        self.current()
            .ok_or_else(|| SyncError::auth(AuthErrorKind::Expired, "no token available"))
    }
}
