use super::vault::{SecretVault, VaultError, keys};
use crate::models::{ACCOUNT_KEY_PREFIX, AppSettings, CookieBundle, ObsSettings, username_display};
use crate::services::api::{ApiError, PlatformApi};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Account {0} is already stored")]
    Duplicated(String),

    #[error("No stored credentials at position {0}")]
    Missing(usize),

    #[error("Stored login for {key} has expired: {message}")]
    Expired { key: String, message: String },

    #[error("Cookie bundle has no DedeUserID")]
    NoAccountId,

    #[error("Vault entry {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode vault entry {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A stored account that passed the identity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAccount {
    pub key: String,
    pub bundle: CookieBundle,
    pub display_name: String,
}

/// Multi-account credential storage on top of a [`SecretVault`].
///
/// The ordered account index lives under `cookiesIndex` as a JSON string
/// array; every indexed key `cookies|<uid>` maps to a JSON cookie map. Vault
/// entries absent from the index are never surfaced.
///
/// # Concurrency
///
/// The vault serializes single operations. Index read-modify-write sequences
/// are only issued by the credential and QR-poll tasks, which the scheduler
/// never runs twice at once.
pub struct CredentialStore {
    vault: Arc<dyn SecretVault>,
}

impl CredentialStore {
    /// Open the store and migrate a legacy single-account layout.
    pub fn open(vault: Arc<dyn SecretVault>) -> Result<Self, CredentialError> {
        let store = Self { vault };
        store.migrate()?;
        Ok(store)
    }

    pub fn vault(&self) -> &Arc<dyn SecretVault> {
        &self.vault
    }

    /// Move a legacy `cookies` entry into the indexed layout.
    ///
    /// Runs only when `cookies` exists and `cookiesIndex` does not. Returns
    /// the key the account now lives under, if a migration happened.
    ///
    /// A legacy entry that is not a cookie map or has no `DedeUserID` cannot
    /// be keyed. It is left in place and an empty index is written, so the
    /// store opens with no accounts and the check does not run again.
    pub fn migrate(&self) -> Result<Option<String>, CredentialError> {
        if self.vault.get(keys::COOKIES_INDEX)?.is_some() {
            return Ok(None);
        }
        let Some(raw) = self.vault.get(keys::LEGACY_COOKIES)? else {
            return Ok(None);
        };

        let key = match parse::<CookieBundle>(keys::LEGACY_COOKIES, &raw) {
            Ok(bundle) => bundle.account_key(),
            Err(err) => {
                tracing::warn!("{}", err);
                None
            }
        };
        let Some(key) = key else {
            tracing::warn!("Legacy credentials have no account id, starting with an empty index");
            self.write_index(&[])?;
            return Ok(None);
        };

        self.vault.set(&key, &raw)?;
        self.write_index(std::slice::from_ref(&key))?;
        self.vault.delete(keys::LEGACY_COOKIES)?;

        tracing::info!("Migrated legacy credentials to {}", key);
        Ok(Some(key))
    }

    /// Ordered account keys.
    ///
    /// A non-array index reads as empty.
    pub fn list_accounts(&self) -> Result<Vec<String>, CredentialError> {
        self.migrate()?;
        let Some(raw) = self.vault.get(keys::COOKIES_INDEX)? else {
            return Ok(Vec::new());
        };
        let index = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Ok(_) => {
                tracing::warn!("Credential index is not an array, ignoring it");
                Vec::new()
            }
            Err(source) => {
                return Err(CredentialError::Corrupt {
                    key: keys::COOKIES_INDEX.to_string(),
                    source,
                });
            }
        };
        Ok(index)
    }

    /// Persist a freshly logged-in account and append it to the index.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Duplicated`] when the derived key is already
    /// indexed; the index is left unchanged.
    pub fn add_account(&self, bundle: &CookieBundle) -> Result<String, CredentialError> {
        let key = bundle.account_key().ok_or(CredentialError::NoAccountId)?;
        let mut index = self.list_accounts()?;
        if index.contains(&key) {
            return Err(CredentialError::Duplicated(key));
        }

        self.vault.set(&key, &to_json(&key, bundle)?)?;
        index.push(key.clone());
        self.write_index(&index)?;

        tracing::info!("Stored account {} ({} total)", key, index.len());
        Ok(key)
    }

    /// Key at `position` of the index.
    pub fn resolve(&self, position: usize) -> Result<String, CredentialError> {
        self.list_accounts()?
            .into_iter()
            .nth(position)
            .ok_or(CredentialError::Missing(position))
    }

    /// Cookie bundle stored under `key`, if any.
    pub fn read_bundle(&self, key: &str) -> Result<Option<CookieBundle>, CredentialError> {
        self.vault
            .get(key)?
            .map(|raw| parse(key, &raw))
            .transpose()
    }

    /// Resolve, read and validate the account at `position`.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::Missing`] for an out-of-range position or a vault miss
    /// - [`CredentialError::Expired`] when the identity call rejects the session
    pub async fn load_account(
        &self,
        position: usize,
        api: &dyn PlatformApi,
    ) -> Result<LoadedAccount, CredentialError> {
        let key = self.resolve(position)?;
        let bundle = self
            .read_bundle(&key)?
            .ok_or(CredentialError::Missing(position))?;

        tracing::info!("Validating stored account {}", key);
        let nav = api.nav(&bundle).await?;
        if !nav.is_valid() {
            return Err(CredentialError::Expired {
                key,
                message: nav.message,
            });
        }

        Ok(LoadedAccount {
            display_name: username_display(&nav.uname, nav.mid),
            key,
            bundle,
        })
    }

    /// Forget the account at `position` and clamp `current` into range.
    ///
    /// A missing vault entry is tolerated; the index entry is always removed.
    /// `current` moves down by one when the removed slot was at or before it
    /// and never exceeds the new-account slot (`len`).
    pub fn remove_account(
        &self,
        position: usize,
        current: &mut usize,
    ) -> Result<Option<String>, CredentialError> {
        let mut index = self.list_accounts()?;
        if position >= index.len() {
            *current = (*current).min(index.len());
            return Ok(None);
        }

        let key = index.remove(position);
        if !self.vault.delete(&key)? {
            tracing::warn!("Vault entry for {} was already gone", key);
        }
        self.write_index(&index)?;

        if position <= *current {
            *current = current.saturating_sub(1);
        }
        *current = (*current).min(index.len());

        tracing::info!("Removed account {} ({} left)", key, index.len());
        Ok(Some(key))
    }

    pub fn load_obs_settings(&self) -> Result<Option<ObsSettings>, CredentialError> {
        self.load_record(keys::OBS_SETTINGS)
    }

    pub fn save_obs_settings(&self, settings: &ObsSettings) -> Result<(), CredentialError> {
        Ok(self.vault.set(keys::OBS_SETTINGS, &to_json(keys::OBS_SETTINGS, settings)?)?)
    }

    pub fn load_app_settings(&self) -> Result<Option<AppSettings>, CredentialError> {
        self.load_record(keys::APP_SETTINGS)
    }

    pub fn save_app_settings(&self, settings: &AppSettings) -> Result<(), CredentialError> {
        Ok(self.vault.set(keys::APP_SETTINGS, &to_json(keys::APP_SETTINGS, settings)?)?)
    }

    pub fn delete_obs_settings(&self) -> Result<bool, CredentialError> {
        Ok(self.vault.delete(keys::OBS_SETTINGS)?)
    }

    pub fn delete_app_settings(&self) -> Result<bool, CredentialError> {
        Ok(self.vault.delete(keys::APP_SETTINGS)?)
    }

    /// Delete the room info older releases persisted.
    pub fn drop_legacy_room_info(&self) -> Result<bool, CredentialError> {
        Ok(self.vault.delete(keys::ROOM_INFO)?)
    }

    /// Delete every account, the index and both settings records.
    pub fn clear_all(&self) -> Result<(), CredentialError> {
        for key in self.list_accounts()? {
            self.vault.delete(&key)?;
        }
        self.vault.delete(keys::COOKIES_INDEX)?;
        self.vault.delete(keys::OBS_SETTINGS)?;
        self.vault.delete(keys::APP_SETTINGS)?;
        tracing::info!("All stored credentials cleared");
        Ok(())
    }

    fn write_index(&self, index: &[String]) -> Result<(), CredentialError> {
        debug_assert!(index.iter().all(|k| k.starts_with(ACCOUNT_KEY_PREFIX)));
        let raw = to_json(keys::COOKIES_INDEX, index)?;
        Ok(self.vault.set(keys::COOKIES_INDEX, &raw)?)
    }

    fn load_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CredentialError> {
        self.vault
            .get(key)?
            .map(|raw| parse(key, &raw))
            .transpose()
    }
}

fn parse<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CredentialError> {
    serde_json::from_str(raw).map_err(|source| CredentialError::Corrupt {
        key: key.to_string(),
        source,
    })
}

fn to_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, CredentialError> {
    serde_json::to_string(value).map_err(|source| CredentialError::Encode {
        key: key.to_string(),
        source,
    })
}
