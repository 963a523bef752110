use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use zeroize::Zeroize;

/// Source of the bearer token used to authenticate sessions.
///
/// Implementations must be cheap to call; the transport asks for the token on
/// every connect and reconnect attempt.
pub trait CredentialProvider: Send + Sync {
    /// Current token, or `None` when the user is not authenticated.
    fn token(&self) -> Option<String>;
}

impl<T: CredentialProvider + ?Sized> CredentialProvider for Arc<T> {
    fn token(&self) -> Option<String> {
        (**self).token()
    }
}

/// A fixed token, typically taken from configuration.
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.is_empty() {
            Self(None)
        } else {
            Self(Some(token))
        }
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

impl Drop for StaticToken {
    fn drop(&mut self) {
        if let Some(ref mut token) = self.0 {
            token.zeroize();
        }
    }
}

struct StoredToken {
    value: String,
    expires_at: Option<Instant>,
}

impl Drop for StoredToken {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

/// Mutable in-memory token store with optional expiry.
///
/// Written by the API client on login/logout and read by the session
/// transport. Expired tokens are treated as absent.
#[derive(Default)]
pub struct TokenStore {
    inner: RwLock<Option<StoredToken>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a token that never expires.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set_token(token, None);
        store
    }

    /// Replace the stored token. `ttl` of `None` means no expiry.
    pub fn set_token(&self, token: impl Into<String>, ttl: Option<Duration>) {
        let token = token.into();
        let mut guard = self.inner.write();
        if token.is_empty() {
            *guard = None;
            return;
        }
        *guard = Some(StoredToken {
            value: token,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        });
        tracing::debug!("Token stored (expiry: {:?})", ttl);
    }

    /// Remove the stored token.
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Whether a token is stored but past its expiry.
    pub fn is_expired(&self) -> bool {
        match self.inner.read().as_ref() {
            Some(StoredToken {
                expires_at: Some(at),
                ..
            }) => Instant::now() >= *at,
            _ => false,
        }
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }
}

impl CredentialProvider for TokenStore {
    fn token(&self) -> Option<String> {
        let guard = self.inner.read();
        let stored = guard.as_ref()?;
        if let Some(at) = stored.expires_at {
            if Instant::now() >= at {
                return None;
            }
        }
        Some(stored.value.clone())
    }
}
