//! Session context: the bearer token and signed-in admin profile.
//!
//! `set_session` / `clear_session` are the only mutation points. A 401 from
//! any request goes through `force_logout`, which clears credentials and
//! notifies the registered observers instead of redirecting anywhere itself.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Admin profile returned by the login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    token: Option<String>,
    user: Option<User>,
}

type LogoutObserver = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    state: RwLock<StoredSession>,
    path: Option<PathBuf>,
    observers: RwLock<Vec<LogoutObserver>>,
}

/// Cheaply clonable handle to the shared session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("signed_in", &self.token().is_some())
            .field("path", &self.inner.path)
            .finish()
    }
}

impl Session {
    /// Session that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::with_state(StoredSession::default(), None)
    }

    /// Session persisted as JSON at `path`; an unreadable file starts signed out.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt session file");
                StoredSession::default()
            }),
            Err(_) => StoredSession::default(),
        };
        Self::with_state(state, Some(path))
    }

    fn with_state(state: StoredSession, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                path,
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Default session file: `$XDG_DATA_HOME/hadir/session.json`.
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("hadir")
            .join("session.json")
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read().user.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.read().token.is_some()
    }

    pub fn set_session(&self, token: String, user: Option<User>) -> std::io::Result<()> {
        {
            let mut state = self.write();
            state.token = Some(token);
            state.user = user;
        }
        self.persist()
    }

    pub fn clear_session(&self) -> std::io::Result<()> {
        *self.write() = StoredSession::default();
        self.persist()
    }

    /// Register a callback run whenever the backend forces a logout.
    pub fn on_forced_logout(&self, observer: impl Fn() + Send + Sync + 'static) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    /// Clear credentials after a 401 and notify observers.
    pub fn force_logout(&self) {
        tracing::warn!("backend rejected credentials; clearing session");
        if let Err(e) = self.clear_session() {
            tracing::error!(error = %e, "failed to clear persisted session");
        }
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer();
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };
        let state = self.read().clone();
        if state.token.is_none() {
            return match std::fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            };
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(&state).map_err(std::io::Error::other)?;
        write_private(path, &json)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoredSession> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoredSession> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write `bytes` to `path` readable by the owner only; the file holds a bearer token.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let mut file = options.open(path)?;
        // `mode` only applies when the file is created.
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        std::io::Write::write_all(&mut file, bytes)
    }
    #[cfg(not(unix))]
    {
        let mut file = options.open(path)?;
        std::io::Write::write_all(&mut file, bytes)
    }
}
