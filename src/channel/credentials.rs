//! Relay authentication credentials
//!
//! Token issuance is external. The channel only polls a provider and does
//! not attempt to connect until it yields a token.

use parking_lot::RwLock;
use std::sync::Arc;

/// Source of the relay authentication token
pub trait CredentialProvider: Send + Sync + 'static {
    /// Current token, `None` while the user is not signed in
    fn token(&self) -> Option<String>;
}

/// Fixed token from configuration or the command line
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Token that can be set or cleared at runtime (sign-in / sign-out)
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        *self.inner.write() = if token.is_empty() { None } else { Some(token) };
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

impl CredentialProvider for SharedCredentials {
    fn token(&self) -> Option<String> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_empty_token_is_none() {
        assert_eq!(StaticCredentials::new(Some(String::new())).token(), None);
        assert_eq!(
            StaticCredentials::new(Some("abc".to_string())).token().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_shared_credentials() {
        let creds = SharedCredentials::new();
        let view = creds.clone();
        assert!(view.token().is_none());

        creds.set("t0k3n");
        assert_eq!(view.token().as_deref(), Some("t0k3n"));

        creds.clear();
        assert!(view.token().is_none());
    }
}
