//! Session identity and the credential supplier seam
//!
//! The coordinator never issues or mutates credentials. It reads the current
//! identity when opening the channel and asks the supplier to refresh when the
//! signaling endpoint rejects the token.

use async_trait::async_trait;
use parking_lot::RwLock;

/// Per-session credentials: a bearer token and the name shown to the remote party
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    token: String,
    display_name: String,
}

impl SessionIdentity {
    /// Create a new identity
    pub fn new(token: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            display_name: display_name.into(),
        }
    }

    /// Bearer token for the signaling and relay-credential endpoints
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Human-readable name sent in `hello` and `offer` messages
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("token", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Source of session credentials (external auth subsystem)
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    /// Current identity, or `None` if the user is not signed in
    fn current(&self) -> Option<SessionIdentity>;

    /// Obtain a fresh token after the signaling endpoint rejected the current one
    ///
    /// Returns `None` if the session can no longer be refreshed.
    async fn refresh(&self) -> Option<SessionIdentity>;
}

/// Supplier backed by a fixed identity that can be swapped or revoked
#[derive(Debug, Default)]
pub struct StaticCredentials {
    identity: RwLock<Option<SessionIdentity>>,
}

impl StaticCredentials {
    /// Create a supplier holding `identity`
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity: RwLock::new(Some(identity)),
        }
    }

    /// Create a supplier with no identity (signed out)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the stored identity
    pub fn set(&self, identity: Option<SessionIdentity>) {
        *self.identity.write() = identity;
    }
}

#[async_trait]
impl CredentialSupplier for StaticCredentials {
    fn current(&self) -> Option<SessionIdentity> {
        self.identity.read().clone()
    }

    async fn refresh(&self) -> Option<SessionIdentity> {
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let identity = SessionIdentity::new("secret-token", "Alice");
        let printed = format!("{:?}", identity);
        assert!(printed.contains("Alice"));
        assert!(!printed.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let supplier = StaticCredentials::empty();
        assert!(supplier.current().is_none());

        supplier.set(Some(SessionIdentity::new("t", "Alice")));
        assert_eq!(supplier.current().unwrap().display_name(), "Alice");
        assert_eq!(supplier.refresh().await.unwrap().token(), "t");

        supplier.set(None);
        assert!(supplier.refresh().await.is_none());
    }
}
