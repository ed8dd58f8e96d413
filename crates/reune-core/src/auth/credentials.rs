//! Durable storage for the access and refresh credentials.
//!
//! All backends implement [`CredentialStore`], a small per-key get/set/delete
//! contract. Writes to a single key are atomic; there is no cross-key
//! transactionality.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CredentialBackend, APP_NAME};

/// Keyring service name
const SERVICE_NAME: &str = APP_NAME;

/// Credentials file name in cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Storage keys for the two credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    AccessToken,
    RefreshToken,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 2] = [CredentialKey::AccessToken, CredentialKey::RefreshToken];

    /// Persistence key name
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::AccessToken => "accessToken",
            CredentialKey::RefreshToken => "refreshToken",
        }
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value persistence for session credentials.
///
/// Implementations must tolerate calls from any number of concurrently
/// running request paths.
pub trait CredentialStore: Send + Sync {
    /// Read a credential, `None` if absent
    fn get(&self, key: CredentialKey) -> Result<Option<String>>;

    /// Write a credential, replacing any previous value
    fn set(&self, key: CredentialKey, value: &str) -> Result<()>;

    /// Remove a credential. Removing an absent key is not an error.
    fn delete(&self, key: CredentialKey) -> Result<()>;
}

/// Open the store selected by configuration.
pub fn open_store(backend: CredentialBackend) -> Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match backend {
        CredentialBackend::Memory => Arc::new(MemoryCredentialStore::new()),
        CredentialBackend::File => Arc::new(FileCredentialStore::default_location()?),
        CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new()),
    };
    debug!(?backend, "Credential store opened");
    Ok(store)
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with both credentials
    pub fn with_credentials(access: &str, refresh: &str) -> Self {
        let mut values = HashMap::new();
        values.insert(CredentialKey::AccessToken, access.to_string());
        values.insert(CredentialKey::RefreshToken, refresh.to_string());
        Self {
            values: RwLock::new(values),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        Ok(values.get(&key).cloned())
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        values.insert(key, value.to_string());
        Ok(())
    }

    fn delete(&self, key: CredentialKey) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        values.remove(&key);
        Ok(())
    }
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(rename = "accessToken", default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    fn slot(&mut self, key: CredentialKey) -> &mut Option<String> {
        match key {
            CredentialKey::AccessToken => &mut self.access_token,
            CredentialKey::RefreshToken => &mut self.refresh_token,
        }
    }
}

/// JSON file store that survives process restarts.
///
/// Every write is a read-modify-write of the whole file, serialized by an
/// in-process lock and published with a temp file + rename.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<cache_dir>/reune/credentials.json`
    pub fn default_location() -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not find cache directory"))?;
        Ok(Self::new(cache_dir.join(APP_NAME).join(CREDENTIALS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoredCredentials> {
        if !self.path.exists() {
            return Ok(StoredCredentials::default());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read credentials file")?;
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }

    fn save(&self, creds: &StoredCredentials) -> Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(creds)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, contents).context("Failed to write credentials file")?;
        std::fs::rename(&tmp_path, &self.path).context("Failed to replace credentials file")?;
        Ok(())
    }

    fn update(&self, key: CredentialKey, value: Option<&str>) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("Credential file lock poisoned"))?;
        let mut creds = self.load()?;
        *creds.slot(key) = value.map(str::to_string);
        creds.updated_at = Some(Utc::now());
        self.save(&creds)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("Credential file lock poisoned"))?;
        let mut creds = self.load()?;
        Ok(creds.slot(key).take())
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        self.update(key, Some(value))
    }

    fn delete(&self, key: CredentialKey) -> Result<()> {
        self.update(key, None)
    }
}

// ============================================================================
// OS keychain store
// ============================================================================

/// OS keychain store, one keyring entry per credential key.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: CredentialKey) -> Result<Entry> {
        Entry::new(&self.service, key.as_str()).context("Failed to create keyring entry")
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store credential in keychain")
    }

    fn delete(&self, key: CredentialKey) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
