use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sealbox_core::error::StoreError;
use thiserror::Error;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const ROOT_KEY_LEN: usize = 32;

/// Root key for one store. Zeroized on drop; never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    /// Store name the key belongs to (safe to log).
    #[zeroize(skip)]
    id: String,
    bytes: [u8; ROOT_KEY_LEN],
}

impl RootKey {
    pub fn new(id: impl Into<String>, bytes: [u8; ROOT_KEY_LEN]) -> Self {
        Self {
            id: id.into(),
            bytes,
        }
    }

    fn generate(id: &str) -> Self {
        let mut bytes = [0u8; ROOT_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::new(id, bytes)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn as_bytes(&self) -> &[u8; ROOT_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootKey")
            .field("id", &self.id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("platform key store error: {0}")]
    Platform(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

impl From<KeyError> for StoreError {
    fn from(err: KeyError) -> Self {
        StoreError::key_unavailable(err.to_string())
    }
}

/// Platform secure storage for raw key bytes (OS credential vault, hardware keystore).
#[async_trait]
pub trait PlatformKeyStore: Send + Sync {
    async fn store(&self, name: &str, key_bytes: &[u8]) -> Result<(), KeyError>;

    /// Returns `None` when nothing is stored under `name`.
    async fn retrieve(&self, name: &str) -> Result<Option<Vec<u8>>, KeyError>;
}

/// Obtains the root key for a store, creating it on first use.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn obtain_root_key(&self, store_name: &str) -> Result<RootKey, KeyError>;
}

/// Key provider backed by a `PlatformKeyStore`.
///
/// Get-or-create runs under one lock, so concurrent callers for the same store
/// observe the same key.
pub struct PlatformKeyProvider<K: PlatformKeyStore> {
    key_store: K,
    obtain: tokio::sync::Mutex<()>,
}

impl<K: PlatformKeyStore> PlatformKeyProvider<K> {
    pub fn new(key_store: K) -> Self {
        Self {
            key_store,
            obtain: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl<K: PlatformKeyStore> KeyProvider for PlatformKeyProvider<K> {
    #[instrument(skip(self))]
    async fn obtain_root_key(&self, store_name: &str) -> Result<RootKey, KeyError> {
        let _guard = self.obtain.lock().await;
        if let Some(mut stored) = self.key_store.retrieve(store_name).await? {
            let key = decode_key(store_name, &stored);
            stored.zeroize();
            return key;
        }

        let key = RootKey::generate(store_name);
        self.key_store.store(store_name, key.as_bytes()).await?;
        debug!("generated new root key");
        Ok(key)
    }
}

/// OS keyring-backed key store. Uses the `keyring` crate; one credential per store name.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, name).map_err(|e| KeyError::Platform(e.to_string()))
    }
}

#[async_trait]
impl PlatformKeyStore for KeyringKeyStore {
    async fn store(&self, name: &str, key_bytes: &[u8]) -> Result<(), KeyError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        let encoded = zeroize::Zeroizing::new(general_purpose::STANDARD.encode(key_bytes));
        self.entry(name)?
            .set_password(&encoded)
            .map_err(|e| KeyError::Platform(e.to_string()))
    }

    async fn retrieve(&self, name: &str) -> Result<Option<Vec<u8>>, KeyError> {
        match self.entry(name)?.get_password() {
            Ok(secret) => {
                let secret = zeroize::Zeroizing::new(secret);
                general_purpose::STANDARD
                    .decode(secret.as_str())
                    .map(Some)
                    .map_err(|e| KeyError::Decode(e.to_string()))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyError::Platform(err.to_string())),
        }
    }
}

/// In-memory key store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    unavailable: bool,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A key store whose every call fails, as if the hardware keystore were gone.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn map(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, KeyError> {
        if self.unavailable {
            return Err(KeyError::Unavailable("keystore is not accessible".into()));
        }
        self.inner
            .lock()
            .map_err(|err| KeyError::Platform(format!("lock poisoned: {err}")))
    }
}

#[async_trait]
impl PlatformKeyStore for InMemoryKeyStore {
    async fn store(&self, name: &str, key_bytes: &[u8]) -> Result<(), KeyError> {
        self.map()?.insert(name.to_string(), key_bytes.to_vec());
        Ok(())
    }

    async fn retrieve(&self, name: &str) -> Result<Option<Vec<u8>>, KeyError> {
        Ok(self.map()?.get(name).cloned())
    }
}

fn decode_key(store_name: &str, bytes: &[u8]) -> Result<RootKey, KeyError> {
    if bytes.len() != ROOT_KEY_LEN {
        return Err(KeyError::Decode(format!(
            "expected {ROOT_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let mut out = [0u8; ROOT_KEY_LEN];
    out.copy_from_slice(bytes);
    Ok(RootKey::new(store_name, out))
}
