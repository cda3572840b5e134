//! Secret storage for accounts and settings.
//!
//! [`SecretVault`] is the storage seam; [`CredentialStore`] layers the
//! multi-account index, legacy migration and settings records on top of it.

pub mod store;
pub mod vault;

pub use store::{CredentialError, CredentialStore, LoadedAccount};
pub use vault::{
    FileVault, KeyringVault, MemoryVault, SERVICE_NAME, SecretVault, VaultError, keys,
};
