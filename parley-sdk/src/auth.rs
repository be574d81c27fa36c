//! Session credential holder.
//!
//! The gateway is the single owner of the bearer token. Other components
//! read a cloned [`Credential`]; nothing here touches the network.

use std::fmt;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Bearer token plus the username it was issued for.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    username: String,
}

impl Credential {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

/// Holds the current credential.
///
/// Reads and `clear()` take the same lock, so a reader sees either the whole
/// credential or none of it.
#[derive(Debug, Default)]
pub struct AuthTokenGateway {
    current: RwLock<Option<Credential>>,
}

impl AuthTokenGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential, replacing any previous one.
    pub fn set_credential(&self, token: &str, username: &str) -> Result<()> {
        let token = token.trim();
        let username = username.trim();
        if token.is_empty() || username.is_empty() {
            return Err(Error::InvalidCredential);
        }
        *self.current.write() = Some(Credential {
            token: token.to_string(),
            username: username.to_string(),
        });
        tracing::debug!(username, "credential set");
        Ok(())
    }

    /// The current credential, or [`Error::NotAuthenticated`].
    pub fn credential(&self) -> Result<Credential> {
        self.current.read().clone().ok_or(Error::NotAuthenticated)
    }

    /// Username of the current credential, if any.
    pub fn username(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.username.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    /// Drop the credential. Idempotent.
    pub fn clear(&self) {
        if self.current.write().take().is_some() {
            tracing::debug!("credential cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parts_are_rejected() {
        let gw = AuthTokenGateway::new();
        assert!(matches!(gw.set_credential("", "alice"), Err(Error::InvalidCredential)));
        assert!(matches!(gw.set_credential("tok", "  "), Err(Error::InvalidCredential)));
        assert!(!gw.is_authenticated());
    }

    #[test]
    fn set_then_read_then_clear() {
        let gw = AuthTokenGateway::new();
        assert!(matches!(gw.credential(), Err(Error::NotAuthenticated)));

        gw.set_credential("tok-1", "alice").unwrap();
        let cred = gw.credential().unwrap();
        assert_eq!(cred.token(), "tok-1");
        assert_eq!(cred.username(), "alice");
        assert_eq!(gw.username().as_deref(), Some("alice"));

        gw.clear();
        gw.clear();
        assert!(matches!(gw.credential(), Err(Error::NotAuthenticated)));
        assert_eq!(gw.username(), None);
    }

    #[test]
    fn debug_never_prints_the_token() {
        let gw = AuthTokenGateway::new();
        gw.set_credential("super-secret", "bob").unwrap();
        let shown = format!("{:?}", gw.credential().unwrap());
        assert!(!shown.contains("super-secret"));
        assert!(shown.contains("bob"));
    }
}
