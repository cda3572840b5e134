use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Service name every vault entry is stored under.
pub const SERVICE_NAME: &str = "StartLive|userCredentials";

/// Well-known vault keys.
pub mod keys {
    pub const OBS_SETTINGS: &str = "settings";
    pub const APP_SETTINGS: &str = "appSettings";
    pub const ROOM_INFO: &str = "roomInfo";
    pub const LEGACY_COOKIES: &str = "cookies";
    pub const COOKIES_INDEX: &str = "cookiesIndex";
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vault file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Vault backend error: {0}")]
    Backend(String),

    #[error("OS credential store error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Secret storage keyed by string.
///
/// Implementations serialize their own operations; callers never hold a lock
/// across two calls.
#[cfg_attr(test, mockall::automock)]
pub trait SecretVault: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError>;

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError>;

    /// Remove `key`; returns whether an entry existed.
    fn delete(&self, key: &str) -> Result<bool, VaultError>;
}

/// Vault in the operating system's credential store.
///
/// Every key is its own entry under the service name: the macOS Keychain,
/// the Windows Credential Manager or the Secret Service on Linux.
#[derive(Debug)]
pub struct KeyringVault {
    service: String,
    lock: Mutex<()>,
}

impl KeyringVault {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
            lock: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, VaultError> {
        Ok(keyring::Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretVault for KeyringVault {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.entry(key)?.set_password(value)?)
    }

    fn delete(&self, key: &str) -> Result<bool, VaultError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local vault.
#[derive(Debug, Default)]
pub struct MemoryVault {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretVault for MemoryVault {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, VaultError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(key).is_some())
    }
}

/// Vault persisted as one plaintext JSON document per service.
///
/// Only used when the launch config selects the file backend, for systems
/// without a credential store. Layout: `{ "<service>": { "<key>": "<value>", ... } }`. Writes go to a
/// sibling temp file that is renamed over the original.
#[derive(Debug)]
pub struct FileVault {
    path: Utf8PathBuf,
    service: String,
    lock: Mutex<()>,
}

type VaultDocument = BTreeMap<String, BTreeMap<String, String>>;

impl FileVault {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        Self::with_service(path, SERVICE_NAME)
    }

    pub fn with_service<P: AsRef<Utf8Path>>(path: P, service: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            service: service.to_string(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn load(&self) -> Result<VaultDocument, VaultError> {
        if !self.path.exists() {
            return Ok(VaultDocument::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(VaultDocument::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn store(&self, document: &VaultDocument) -> Result<(), VaultError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(document)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SecretVault for FileVault {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.load()?;
        Ok(document
            .get(&self.service)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        document
            .entry(self.service.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.store(&document)
    }

    fn delete(&self, key: &str) -> Result<bool, VaultError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        let existed = document
            .get_mut(&self.service)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false);
        if existed {
            self.store(&document)?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_vault(temp_dir: &TempDir) -> FileVault {
        let path = Utf8PathBuf::try_from(temp_dir.path().join("vault.json")).unwrap();
        FileVault::new(path)
    }

    #[test]
    fn test_memory_vault_roundtrip() {
        let vault = MemoryVault::new();
        assert!(vault.get("missing").unwrap().is_none());

        vault.set("settings", "{}").unwrap();
        assert_eq!(vault.get("settings").unwrap().as_deref(), Some("{}"));
        assert_eq!(vault.len(), 1);

        assert!(vault.delete("settings").unwrap());
        assert!(!vault.delete("settings").unwrap());
        assert!(vault.is_empty());
    }

    #[test]
    fn test_keyring_vault_maps_missing_entries() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let vault = KeyringVault::new();
        assert_eq!(vault.service(), SERVICE_NAME);

        assert!(vault.get("cookies|1").unwrap().is_none());
        assert!(!vault.delete("cookies|1").unwrap());
        vault.set("cookies|1", r#"{"a":"b"}"#).unwrap();
    }

    #[test]
    fn test_keyring_errors_become_vault_errors() {
        let err: VaultError = keyring::Error::TooLong("user".into(), 255).into();
        assert!(matches!(err, VaultError::Keyring(_)));
        assert!(err.to_string().starts_with("OS credential store error"));
    }

    #[test]
    fn test_file_vault_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        file_vault(&temp_dir).set("cookies|1", r#"{"a":"b"}"#).unwrap();

        let reopened = file_vault(&temp_dir);
        assert_eq!(
            reopened.get("cookies|1").unwrap().as_deref(),
            Some(r#"{"a":"b"}"#)
        );
    }

    #[test]
    fn test_file_vault_services_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().join("vault.json")).unwrap();
        let one = FileVault::with_service(&path, "one");
        let two = FileVault::with_service(&path, "two");

        one.set("key", "1").unwrap();
        two.set("key", "2").unwrap();

        assert_eq!(one.get("key").unwrap().as_deref(), Some("1"));
        assert_eq!(two.get("key").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_file_vault_delete_missing_is_false() {
        let temp_dir = TempDir::new().unwrap();
        let vault = file_vault(&temp_dir);

        assert!(!vault.delete("nothing").unwrap());
        assert!(!vault.path().exists());
    }

    #[test]
    fn test_file_vault_reports_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let vault = file_vault(&temp_dir);
        fs::write(vault.path(), "not json").unwrap();

        assert!(matches!(vault.get("key"), Err(VaultError::Corrupt(_))));
    }
}
