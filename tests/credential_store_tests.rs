//! Integration tests for the credential store
//!
//! These tests verify that:
//! - Accounts survive reopening a file-backed vault
//! - A legacy single-account layout is migrated exactly once
//! - Stored accounts are validated against the identity call
//! - Removal and clearing leave the vault consistent

mod common;

use camino::Utf8PathBuf;
use common::{FakeApi, session};
use startlive::credentials::{CredentialError, CredentialStore, FileVault, SecretVault, keys};
use startlive::models::ObsSettings;
use std::sync::Arc;
use tempfile::TempDir;

fn vault_path(temp_dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(temp_dir.path().join("StartLive Data").join("vault.json")).unwrap()
}

fn open(path: &Utf8PathBuf) -> CredentialStore {
    CredentialStore::open(Arc::new(FileVault::new(path))).unwrap()
}

#[test]
fn test_accounts_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = vault_path(&temp_dir);

    {
        let store = open(&path);
        store.add_account(&session("42")).unwrap();
        store.add_account(&session("43")).unwrap();
    }

    let store = open(&path);
    assert_eq!(
        store.list_accounts().unwrap(),
        vec!["cookies|42", "cookies|43"]
    );
    assert_eq!(store.read_bundle("cookies|43").unwrap(), Some(session("43")));
    assert!(path.exists());
}

#[test]
fn test_legacy_layout_is_migrated_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = vault_path(&temp_dir);
    let legacy = serde_json::to_string(&session("7")).unwrap();

    let vault = Arc::new(FileVault::new(&path));
    vault.set(keys::LEGACY_COOKIES, &legacy).unwrap();

    let store = CredentialStore::open(Arc::clone(&vault) as Arc<dyn SecretVault>).unwrap();
    assert_eq!(store.list_accounts().unwrap(), vec!["cookies|7"]);
    assert!(vault.get(keys::LEGACY_COOKIES).unwrap().is_none());
    assert_eq!(vault.get("cookies|7").unwrap().as_deref(), Some(legacy.as_str()));

    // A second legacy entry next to an existing index is left alone.
    vault.set(keys::LEGACY_COOKIES, &legacy).unwrap();
    assert_eq!(store.migrate().unwrap(), None);
    assert_eq!(store.list_accounts().unwrap(), vec!["cookies|7"]);
}

#[test]
fn test_legacy_layout_without_uid_opens_empty() {
    let temp_dir = TempDir::new().unwrap();
    let path = vault_path(&temp_dir);
    let vault = Arc::new(FileVault::new(&path));
    vault
        .set(keys::LEGACY_COOKIES, r#"{"SESSDATA":"abc"}"#)
        .unwrap();

    let store = CredentialStore::open(Arc::clone(&vault) as Arc<dyn SecretVault>).unwrap();
    assert!(store.list_accounts().unwrap().is_empty());
    assert_eq!(store.migrate().unwrap(), None);

    // The store stays usable and the next launch opens the same way.
    store.add_account(&session("42")).unwrap();
    assert_eq!(open(&path).list_accounts().unwrap(), vec!["cookies|42"]);
}

#[test]
fn test_corrupt_vault_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = vault_path(&temp_dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "not json").unwrap();

    assert!(matches!(
        CredentialStore::open(Arc::new(FileVault::new(&path))),
        Err(CredentialError::Vault(_))
    ));
}

#[test]
fn test_load_account_validates_identity() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&vault_path(&temp_dir));
    store.add_account(&session("42")).unwrap();
    store.add_account(&session("99")).unwrap();
    let api = FakeApi::new().with_user("42", "alice");

    let loaded = tokio_test::block_on(store.load_account(0, &api)).unwrap();
    assert_eq!(loaded.key, "cookies|42");
    assert_eq!(loaded.display_name, "alice (42)");
    assert_eq!(loaded.bundle, session("42"));

    let expired = tokio_test::block_on(store.load_account(1, &api));
    assert!(matches!(
        expired,
        Err(CredentialError::Expired { ref key, .. }) if key == "cookies|99"
    ));

    let missing = tokio_test::block_on(store.load_account(2, &api));
    assert!(matches!(missing, Err(CredentialError::Missing(2))));
}

#[test]
fn test_index_entry_without_secret_reads_as_missing() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&vault_path(&temp_dir));
    store.add_account(&session("42")).unwrap();
    store.vault().delete("cookies|42").unwrap();

    let api = FakeApi::new().with_user("42", "alice");
    let result = tokio_test::block_on(store.load_account(0, &api));
    assert!(matches!(result, Err(CredentialError::Missing(0))));
}

#[test]
fn test_remove_then_clear() {
    let temp_dir = TempDir::new().unwrap();
    let path = vault_path(&temp_dir);
    let store = open(&path);
    for uid in ["1", "2", "3"] {
        store.add_account(&session(uid)).unwrap();
    }
    store
        .save_obs_settings(&ObsSettings {
            password: "hunter2".to_string(),
            ..Default::default()
        })
        .unwrap();

    let mut current = 1;
    let removed = store.remove_account(1, &mut current).unwrap();
    assert_eq!(removed.as_deref(), Some("cookies|2"));
    assert_eq!(current, 0);

    let mut current = 5;
    assert_eq!(store.remove_account(5, &mut current).unwrap(), None);
    assert_eq!(current, 2);

    let reopened = open(&path);
    assert_eq!(
        reopened.list_accounts().unwrap(),
        vec!["cookies|1", "cookies|3"]
    );

    reopened.clear_all().unwrap();
    assert!(open(&path).list_accounts().unwrap().is_empty());
    assert!(open(&path).load_obs_settings().unwrap().is_none());
}

#[test]
fn test_drop_legacy_room_info() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&vault_path(&temp_dir));
    store.vault().set(keys::ROOM_INFO, "{}").unwrap();

    assert!(store.drop_legacy_room_info().unwrap());
    assert!(!store.drop_legacy_room_info().unwrap());
}
