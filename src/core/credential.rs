//! Single-secret credential store.
//!
//! The API key lives in memory for the session and is mirrored to one
//! durable key/value slot. A new key reaches storage before memory, so a
//! failed write never activates an unsaved key. Clearing drops the key
//! from memory first, so a storage failure never keeps a discarded key
//! in use.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use keyring::Entry;
use tracing::{debug, info, warn};

use crate::core::config::data::path_display;
use crate::core::config::io::write_atomically;
use crate::core::constants::{CREDENTIAL_STORAGE_KEY, KEYRING_SERVICE};

#[derive(Debug)]
pub enum CredentialStorageError {
    Keyring(keyring::Error),
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Serialize(toml::ser::Error),
}

impl fmt::Display for CredentialStorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialStorageError::Keyring(err) => write!(f, "Keyring error: {err}"),
            CredentialStorageError::Io { path, source } => {
                write!(f, "Failed to access {}: {}", path_display(path), source)
            }
            CredentialStorageError::Parse { path, source } => {
                write!(f, "Failed to parse {}: {}", path_display(path), source)
            }
            CredentialStorageError::Serialize(source) => {
                write!(f, "Failed to serialize credentials: {source}")
            }
        }
    }
}

impl Error for CredentialStorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CredentialStorageError::Keyring(err) => Some(err),
            CredentialStorageError::Io { source, .. } => Some(source),
            CredentialStorageError::Parse { source, .. } => Some(source),
            CredentialStorageError::Serialize(source) => Some(source),
        }
    }
}

impl From<keyring::Error> for CredentialStorageError {
    fn from(err: keyring::Error) -> Self {
        CredentialStorageError::Keyring(err)
    }
}

impl CredentialStorageError {
    /// True when the platform keyring is only temporarily out of reach,
    /// e.g. a locked keychain or no session bus.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CredentialStorageError::Keyring(
                keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_)
            )
        )
    }
}

/// Why a candidate API key was not accepted.
#[derive(Debug)]
pub enum ValidationError {
    /// Blank input.
    Empty,
    /// The API answered the probe with a non-success status.
    Rejected { status: u16, message: String },
    /// The probe never got an answer.
    Unreachable(String),
    /// The key was accepted but could not be persisted.
    Storage(CredentialStorageError),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty => write!(f, "API key must not be empty"),
            ValidationError::Rejected { message, .. } => write!(f, "{message}"),
            ValidationError::Unreachable(message) => write!(f, "{message}"),
            ValidationError::Storage(err) => write!(f, "Failed to save API key: {err}"),
        }
    }
}

impl Error for ValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ValidationError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

/// Durable home of the one persisted key/value pair.
pub trait CredentialBackend: Send + Sync {
    fn load(&self) -> Result<Option<String>, CredentialStorageError>;
    fn save(&self, secret: &str) -> Result<(), CredentialStorageError>;
    fn remove(&self) -> Result<(), CredentialStorageError>;
    fn describe(&self) -> String;
}

/// Checks a candidate secret against the remote API.
#[async_trait]
pub trait CredentialProbe: Send + Sync {
    async fn probe(&self, secret: &str) -> Result<(), ValidationError>;
}

pub struct KeyringBackend {
    service: String,
    account: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            account: CREDENTIAL_STORAGE_KEY.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, CredentialStorageError> {
        Ok(Entry::new(&self.service, &self.account)?)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<String>, CredentialStorageError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, secret: &str) -> Result<(), CredentialStorageError> {
        self.entry()?.set_password(secret)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), CredentialStorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self) -> String {
        format!("system keyring ({}/{})", self.service, self.account)
    }
}

/// Stores the key in a small TOML table, `chat_api_key = "..."`.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<toml::Table, CredentialStorageError> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let contents =
            fs::read_to_string(&self.path).map_err(|source| CredentialStorageError::Io {
                path: self.path.clone(),
                source,
            })?;
        toml::from_str(&contents).map_err(|source| CredentialStorageError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_table(&self, table: &toml::Table) -> Result<(), CredentialStorageError> {
        let contents = toml::to_string(table).map_err(CredentialStorageError::Serialize)?;
        // NamedTempFile is created 0600, so the secret is never world-readable.
        write_atomically(&self.path, contents.as_bytes()).map_err(|source| {
            CredentialStorageError::Io {
                path: self.path.clone(),
                source,
            }
        })
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<String>, CredentialStorageError> {
        let table = self.read_table()?;
        Ok(table
            .get(CREDENTIAL_STORAGE_KEY)
            .and_then(|value| value.as_str())
            .filter(|secret| !secret.is_empty())
            .map(str::to_owned))
    }

    fn save(&self, secret: &str) -> Result<(), CredentialStorageError> {
        let mut table = self.read_table()?;
        table.insert(
            CREDENTIAL_STORAGE_KEY.to_string(),
            toml::Value::String(secret.to_string()),
        );
        self.write_table(&table)
    }

    fn remove(&self) -> Result<(), CredentialStorageError> {
        let mut table = self.read_table()?;
        if table.remove(CREDENTIAL_STORAGE_KEY).is_none() {
            return Ok(());
        }
        if table.is_empty() {
            fs::remove_file(&self.path).map_err(|source| CredentialStorageError::Io {
                path: self.path.clone(),
                source,
            })
        } else {
            self.write_table(&table)
        }
    }

    fn describe(&self) -> String {
        path_display(&self.path)
    }
}

/// Process-local storage; clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(secret.into()))),
        }
    }

    pub fn stored(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>, CredentialStorageError> {
        Ok(self.stored())
    }

    fn save(&self, secret: &str) -> Result<(), CredentialStorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(secret.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), CredentialStorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret: String,
    pub validated: bool,
}

pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    credential: Option<Credential>,
}

impl CredentialStore {
    /// Load whatever the backend holds. Only validated keys are ever
    /// persisted, so a stored key comes back as validated.
    pub fn load(backend: Box<dyn CredentialBackend>) -> Result<Self, CredentialStorageError> {
        let credential = backend.load()?.map(|secret| Credential {
            secret,
            validated: true,
        });
        debug!(
            backend = %backend.describe(),
            present = credential.is_some(),
            "Loaded credential"
        );
        Ok(Self {
            backend,
            credential,
        })
    }

    /// A store that starts empty regardless of what the backend holds.
    pub fn empty(backend: Box<dyn CredentialBackend>) -> Self {
        Self {
            backend,
            credential: None,
        }
    }

    pub fn get(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.secret.as_str())
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.credential.is_some()
    }

    pub fn backend_description(&self) -> String {
        self.backend.describe()
    }

    /// Probe `secret` and keep it only if the API accepts it.
    ///
    /// A rejected or unreachable probe also forgets any previously stored key.
    pub async fn set(
        &mut self,
        secret: &str,
        probe: &dyn CredentialProbe,
    ) -> Result<(), ValidationError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(ValidationError::Empty);
        }

        if let Err(err) = probe.probe(secret).await {
            warn!("API key validation failed: {err}");
            if let Err(clear_err) = self.clear() {
                warn!("Failed to discard stored API key: {clear_err}");
            }
            return Err(err);
        }

        self.backend
            .save(secret)
            .map_err(ValidationError::Storage)?;
        self.credential = Some(Credential {
            secret: secret.to_string(),
            validated: true,
        });
        info!(length = secret.len(), "Stored validated API key");
        Ok(())
    }

    /// Forget the key. Memory is cleared even when the backend fails; the
    /// storage error is still returned.
    pub fn clear(&mut self) -> Result<(), CredentialStorageError> {
        if self.credential.take().is_some() {
            info!("Cleared API key");
        }
        self.backend.remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StaticProbe {
        accept: bool,
        calls: AtomicUsize,
    }

    impl StaticProbe {
        fn new(accept: bool) -> Self {
            Self {
                accept,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialProbe for StaticProbe {
        async fn probe(&self, _secret: &str) -> Result<(), ValidationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                Ok(())
            } else {
                Err(ValidationError::Rejected {
                    status: 401,
                    message: "User not found.".to_string(),
                })
            }
        }
    }

    #[tokio::test]
    async fn accepted_key_is_persisted_and_validated() {
        let backend = MemoryBackend::new();
        let mut store = CredentialStore::load(Box::new(backend.clone())).unwrap();
        assert!(store.get().is_none());

        let probe = StaticProbe::new(true);
        store.set("  sk-or-v1-abc  ", &probe).await.unwrap();

        assert_eq!(store.get(), Some("sk-or-v1-abc"));
        assert!(store.credential().unwrap().validated);
        assert_eq!(backend.stored().as_deref(), Some("sk-or-v1-abc"));
    }

    #[tokio::test]
    async fn rejected_key_is_not_persisted_and_discards_previous() {
        let backend = MemoryBackend::with_secret("sk-old");
        let mut store = CredentialStore::load(Box::new(backend.clone())).unwrap();
        assert_eq!(store.get(), Some("sk-old"));

        let probe = StaticProbe::new(false);
        let err = store.set("sk-bad", &probe).await.unwrap_err();

        assert_eq!(err.to_string(), "User not found.");
        assert!(store.get().is_none());
        assert!(backend.stored().is_none());
    }

    #[tokio::test]
    async fn blank_key_skips_the_probe() {
        let mut store = CredentialStore::load(Box::new(MemoryBackend::with_secret("sk-1"))).unwrap();
        let probe = StaticProbe::new(true);

        assert!(matches!(
            store.set("   ", &probe).await,
            Err(ValidationError::Empty)
        ));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(), Some("sk-1"));
    }

    #[test]
    fn clear_removes_memory_and_storage() {
        let backend = MemoryBackend::with_secret("sk-1");
        let mut store = CredentialStore::load(Box::new(backend.clone())).unwrap();
        store.clear().unwrap();
        assert!(store.get().is_none());
        assert!(backend.stored().is_none());
    }

    struct StuckBackend;

    impl CredentialBackend for StuckBackend {
        fn load(&self) -> Result<Option<String>, CredentialStorageError> {
            Ok(Some("sk-stuck".to_string()))
        }

        fn save(&self, _secret: &str) -> Result<(), CredentialStorageError> {
            Ok(())
        }

        fn remove(&self) -> Result<(), CredentialStorageError> {
            Err(keyring::Error::PlatformFailure("locked".into()).into())
        }

        fn describe(&self) -> String {
            "stuck".to_string()
        }
    }

    #[test]
    fn clear_forgets_key_even_when_storage_fails() {
        let mut store = CredentialStore::load(Box::new(StuckBackend)).unwrap();
        assert_eq!(store.get(), Some("sk-stuck"));

        let err = store.clear().unwrap_err();

        assert!(matches!(err, CredentialStorageError::Keyring(_)));
        assert!(store.get().is_none());
        assert!(!store.is_configured());
    }

    #[test]
    fn only_keyring_outages_are_recoverable() {
        let err = CredentialStorageError::from(keyring::Error::PlatformFailure("locked".into()));
        assert!(err.is_recoverable());
        assert!(err.source().is_some());

        let err = CredentialStorageError::from(keyring::Error::TooLong("user".into(), 255));
        assert!(!err.is_recoverable());

        let err = CredentialStorageError::Io {
            path: PathBuf::from("credentials.toml"),
            source: std::io::Error::other("denied"),
        };
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn file_backend_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.toml");

        let mut store = CredentialStore::load(Box::new(FileBackend::new(&path))).unwrap();
        store.set("sk-file", &StaticProbe::new(true)).await.unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("chat_api_key"));

        let reloaded = CredentialStore::load(Box::new(FileBackend::new(&path))).unwrap();
        assert_eq!(reloaded.get(), Some("sk-file"));

        let mut reloaded = reloaded;
        reloaded.clear().unwrap();
        assert!(!path.exists());
        assert!(FileBackend::new(&path).load().unwrap().is_none());
    }

    #[test]
    fn file_backend_keeps_unrelated_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.toml");
        fs::write(&path, "other = \"value\"\nchat_api_key = \"sk-1\"\n").unwrap();

        let backend = FileBackend::new(&path);
        assert_eq!(backend.load().unwrap().as_deref(), Some("sk-1"));
        backend.remove().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("other"));
        assert!(!contents.contains("chat_api_key"));
        backend.remove().unwrap();
    }

    #[test]
    fn file_backend_reports_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.toml");
        fs::write(&path, "chat_api_key = ").unwrap();

        let err = FileBackend::new(&path).load().unwrap_err();
        assert!(matches!(err, CredentialStorageError::Parse { .. }));
    }
}
