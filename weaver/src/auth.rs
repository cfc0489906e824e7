//! Bearer token supply for the HTTP API and the chat channel.

use std::sync::Arc;

/// Supplies the current bearer token, if any.
///
/// Asked again on every request and every connection attempt so a
/// refreshed token is picked up without reopening anything.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token from configuration.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Wrap an optional configured token.
    pub fn shared(token: Option<String>) -> Option<Arc<dyn TokenSource>> {
        token
            .filter(|t| !t.is_empty())
            .map(|t| Arc::new(Self(t)) as Arc<dyn TokenSource>)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// `Authorization` header value for `source`.
pub fn bearer(source: Option<&Arc<dyn TokenSource>>) -> Option<String> {
    source
        .and_then(|s| s.token())
        .map(|token| format!("Bearer {token}"))
}
