use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use sealbox_storage::{
    encrypted_store::EncryptedStore,
    file_entry_store::FileEntryStore,
    key_provider::{KeyringKeyStore, PlatformKeyProvider},
};
use tracing::debug;

/// Resolve the default data directory for Sealbox.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("sealbox"))
}

/// Open the named store with keys from the OS keychain, honouring config overrides.
pub async fn open_store(
    config: &Config,
    store_override: Option<&str>,
) -> Result<EncryptedStore<FileEntryStore>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let name = store_override.unwrap_or_else(|| config.store_name());
    let path = FileEntryStore::path_for(&root, name);
    debug!(?path, store = name, "opening encrypted store");

    let entries = FileEntryStore::open(&path)?;
    let provider = PlatformKeyProvider::new(KeyringKeyStore::new(config.keyring_service()));
    Ok(EncryptedStore::open(name, entries, &provider, config.fallback()).await?)
}

/// Helper for tests: a file-backed store rooted at `root` with an in-memory key.
#[cfg(test)]
pub async fn test_store(root: impl Into<PathBuf>) -> EncryptedStore<FileEntryStore> {
    use sealbox_storage::{encrypted_store::FallbackPolicy, key_provider::InMemoryKeyStore};

    let path = FileEntryStore::path_for(root.into(), "test");
    let entries = FileEntryStore::open(path).expect("open test store");
    EncryptedStore::open(
        "test",
        entries,
        &PlatformKeyProvider::new(InMemoryKeyStore::new()),
        FallbackPolicy::Plaintext,
    )
    .await
    .expect("init test store")
}
