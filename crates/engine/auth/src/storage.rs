//! Client-side storage media
//!
//! Key/value stores standing in for browser local and session storage, plus
//! a cookie jar. Every medium is optional: a host without one (a non-browser
//! context, a locked-down profile) passes `None` and callers treat that as
//! "nothing stored".

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Storage key names. Other parts of the client read these directly, so the
/// exact strings are part of the contract.
pub mod keys {
    /// Local storage: synthetic test public key.
    pub const TEST_PUBLIC_KEY: &str = "nostr_test_pk";
    /// Local storage: synthetic test private key.
    pub const TEST_SECRET_KEY: &str = "nostr_test_sk";
    /// Local storage: `"true"` while a test-mode session is active.
    pub const TEST_MODE: &str = "isTestMode";
    /// Local storage: one-shot flag suppressing the next auto redirect.
    pub const PREVENT_AUTO_LOGIN: &str = "prevent_auto_login";
    /// Local storage: epoch millis when the current login was started.
    pub const AUTH_INITIATED: &str = "auth_initiated";
    /// Local storage: mirror of the pubkey cookie.
    pub const AUTH_PUBKEY: &str = "auth_pubkey";
    /// Local storage: epoch millis when the session was established.
    pub const AUTH_TIMESTAMP: &str = "auth_timestamp";

    /// Cookie: the session public key.
    pub const PUBKEY_COOKIE: &str = "nostr_pubkey";
    /// Cookie: opaque backend token.
    pub const TOKEN_COOKIE: &str = "auth_token";
}

/// File name used by [`FileStore::default_location`].
const LOCAL_STORE_FILE_NAME: &str = "local-storage.toml";

/// File name used by [`FileCookieJar::default_location`].
const COOKIE_FILE_NAME: &str = "cookies.toml";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupt: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A string key/value medium (local or session storage).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
    fn clear(&self) -> StorageResult<()>;
}

/// A cookie jar. Cookies are cleared one name at a time, so the jar must be
/// able to enumerate what it holds.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> StorageResult<Option<String>>;
    fn set(&self, name: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, name: &str) -> StorageResult<()>;
    fn names(&self) -> StorageResult<Vec<String>>;
}

/// The storage media available to the client.
#[derive(Clone, Default)]
pub struct ClientStorage {
    pub local: Option<Arc<dyn KeyValueStore>>,
    pub session: Option<Arc<dyn KeyValueStore>>,
    pub cookies: Option<Arc<dyn CookieJar>>,
}

impl ClientStorage {
    /// No storage medium at all.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Fresh in-memory media for every slot.
    pub fn in_memory() -> Self {
        Self {
            local: Some(Arc::new(MemoryStore::new())),
            session: Some(Arc::new(MemoryStore::new())),
            cookies: Some(Arc::new(MemoryCookieJar::new())),
        }
    }

    /// File-backed local storage and cookies under `dir`; session storage is
    /// in-memory since it should not outlive the process.
    pub fn persistent(dir: &Path) -> StorageResult<Self> {
        Ok(Self {
            local: Some(Arc::new(FileStore::open(dir.join(LOCAL_STORE_FILE_NAME))?)),
            session: Some(Arc::new(MemoryStore::new())),
            cookies: Some(Arc::new(FileCookieJar::open(dir.join(COOKIE_FILE_NAME))?)),
        })
    }

    pub fn local(&self) -> Option<&dyn KeyValueStore> {
        self.local.as_deref()
    }

    pub fn session(&self) -> Option<&dyn KeyValueStore> {
        self.session.as_deref()
    }

    pub fn cookies(&self) -> Option<&dyn CookieJar> {
        self.cookies.as_deref()
    }
}

impl fmt::Debug for ClientStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStorage")
            .field("local", &self.local.is_some())
            .field("session", &self.session.is_some())
            .field("cookies", &self.cookies.is_some())
            .finish()
    }
}

/// In-memory key/value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// In-memory cookie jar.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: RwLock<BTreeMap<String, String>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> StorageResult<Option<String>> {
        Ok(self.cookies.read().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> StorageResult<()> {
        self.cookies.write().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        self.cookies.write().remove(name);
        Ok(())
    }

    fn names(&self) -> StorageResult<Vec<String>> {
        Ok(self.cookies.read().keys().cloned().collect())
    }
}

/// Key/value store persisted as a flat TOML table.
///
/// Every write goes straight to disk; reads are served from memory.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: PathBuf) -> StorageResult<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| StorageError::Corrupt(e.to_string()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Directory used when no explicit data dir is configured.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("admarket"))
            .unwrap_or_else(|| PathBuf::from(".admarket"))
    }

    /// Open the store at its default location.
    pub fn default_location() -> StorageResult<Self> {
        Self::open(Self::default_dir().join(LOCAL_STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content =
            toml::to_string_pretty(entries).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut entries = self.entries.write();
        entries.clear();
        self.persist(&entries)
    }
}

/// Cookie jar persisted the same way as [`FileStore`].
#[derive(Debug)]
pub struct FileCookieJar {
    inner: FileStore,
}

impl FileCookieJar {
    pub fn open(path: PathBuf) -> StorageResult<Self> {
        Ok(Self {
            inner: FileStore::open(path)?,
        })
    }

    pub fn default_location() -> StorageResult<Self> {
        Self::open(FileStore::default_dir().join(COOKIE_FILE_NAME))
    }
}

impl CookieJar for FileCookieJar {
    fn get(&self, name: &str) -> StorageResult<Option<String>> {
        self.inner.get(name)
    }

    fn set(&self, name: &str, value: &str) -> StorageResult<()> {
        self.inner.set(name, value)
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        KeyValueStore::remove(&self.inner, name)
    }

    fn names(&self) -> StorageResult<Vec<String>> {
        Ok(self.inner.entries.read().keys().cloned().collect())
    }
}
