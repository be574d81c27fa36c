//! Persisted session (credential) storage.
//!
//! The default store lives at `~/.config/parley/session.toml`. A session read
//! at startup is fed into the [`AuthTokenGateway`] so a restart resumes
//! without logging in again.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::auth::AuthTokenGateway;
use crate::error::Result;

/// What survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: String,
    pub username: String,
}

/// Where the session is kept between runs.
pub trait SessionStore: Send + Sync {
    /// The saved session, if any. A damaged store reads as empty.
    fn load(&self) -> Option<StoredSession>;
    fn save(&self, session: &StoredSession) -> Result<()>;
    /// Forget the saved session. Clearing an empty store is fine.
    fn clear(&self) -> Result<()>;
}

/// Seed `gateway` from `store`. Returns whether a usable session was found.
pub fn restore_into(store: &dyn SessionStore, gateway: &AuthTokenGateway) -> bool {
    let Some(session) = store.load() else {
        return false;
    };
    match gateway.set_credential(&session.access_token, &session.username) {
        Ok(()) => {
            tracing::info!(username = %session.username, "restored saved session");
            true
        }
        Err(e) => {
            tracing::warn!("ignoring saved session: {e}");
            false
        }
    }
}

/// In-memory store, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    session: Mutex<Option<StoredSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Option<StoredSession> {
        self.session.lock().clone()
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        *self.session.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.session.lock() = None;
        Ok(())
    }
}

/// TOML file store.
#[derive(Debug, Clone)]
pub struct TomlSessionStore {
    path: PathBuf,
}

impl TomlSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/parley/session.toml`.
    pub fn default_location() -> Self {
        let dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir.join("parley").join("session.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for TomlSessionStore {
    fn load(&self) -> Option<StoredSession> {
        if !self.path.exists() {
            return None;
        }
        match std::fs::read_to_string(&self.path) {
            Ok(s) => match toml::from_str(&s) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!("bad session file {}: {e}", self.path.display());
                    None
                }
            },
            Err(e) => {
                tracing::warn!("can't read {}: {e}", self.path.display());
                None
            }
        }
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let body = toml::to_string_pretty(session).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> StoredSession {
        StoredSession {
            access_token: "tok-1".into(),
            username: "alice".into(),
        }
    }

    #[test]
    fn toml_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.toml");
        TomlSessionStore::new(&path).save(&alice()).unwrap();

        let reopened = TomlSessionStore::new(&path);
        assert_eq!(reopened.load(), Some(alice()));

        let gw = AuthTokenGateway::new();
        assert!(restore_into(&reopened, &gw));
        assert_eq!(gw.credential().unwrap().token(), "tok-1");
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlSessionStore::new(dir.path().join("session.toml"));
        store.clear().unwrap();
        store.save(&alice()).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn damaged_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "access_token = ").unwrap();
        assert!(TomlSessionStore::new(path).load().is_none());
    }

    #[test]
    fn blank_saved_token_is_not_restored() {
        let store = MemoryStore::new();
        store
            .save(&StoredSession {
                access_token: "  ".into(),
                username: "alice".into(),
            })
            .unwrap();
        let gw = AuthTokenGateway::new();
        assert!(!restore_into(&store, &gw));
        assert!(!gw.is_authenticated());
    }
}
