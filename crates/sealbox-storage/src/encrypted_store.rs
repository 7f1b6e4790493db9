//! Public key/value API composing the codec with an entry store.
//!
//! A store handle starts `Pending`, becomes usable after [`EncryptedStore::initialize`]
//! obtains the root key, and stops serving requests once closed. When the key provider
//! fails, [`FallbackPolicy`] decides between plaintext persistence (the default,
//! trading confidentiality for availability) and refusing all operations.
//!
//! Records written in plaintext carry no nonce. The next initialization that obtains
//! the root key re-seals them, since encrypted lookups cannot otherwise reach them.

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use sealbox_core::{
    error::{ErrorKind, StoreError},
    storage::{BatchOp, EncryptedEntry, EntryStore},
};

use crate::{codec::Codec, key_provider::KeyProvider};

/// What to do when no root key can be obtained at initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Keep the store usable, persisting entries unencrypted, and record a diagnostic.
    #[default]
    Plaintext,
    /// Leave the store unavailable until a later `initialize` succeeds.
    FailClosed,
}

/// Non-fatal condition recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
}

enum Protection {
    Encrypted(Codec),
    Plaintext,
}

impl Protection {
    fn lookup_key(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match self {
            Protection::Encrypted(codec) => codec.encrypt_key(key),
            Protection::Plaintext => Ok(key.as_bytes().to_vec()),
        }
    }

    fn seal(&self, key: &str, value: &str) -> Result<EncryptedEntry, StoreError> {
        match self {
            Protection::Encrypted(codec) => seal_entry(codec, key, value),
            Protection::Plaintext => Ok(EncryptedEntry {
                encrypted_key: key.as_bytes().to_vec(),
                encrypted_value: value.as_bytes().to_vec(),
                nonce: Vec::new(),
            }),
        }
    }

    fn open(&self, entry: &EncryptedEntry) -> Result<String, StoreError> {
        match self {
            Protection::Encrypted(codec) => {
                codec.decrypt_value(&entry.encrypted_value, &entry.nonce, &entry.encrypted_key)
            }
            Protection::Plaintext => String::from_utf8(entry.encrypted_value.clone())
                .map_err(|_| StoreError::tampered("stored value is not valid UTF-8")),
        }
    }
}

fn seal_entry(codec: &Codec, key: &str, value: &str) -> Result<EncryptedEntry, StoreError> {
    let encrypted_key = codec.encrypt_key(key)?;
    let (encrypted_value, nonce) = codec.encrypt_value(value, &encrypted_key)?;
    Ok(EncryptedEntry {
        encrypted_key,
        encrypted_value,
        nonce,
    })
}

/// Replace one plaintext record with its sealed form.
fn reseal(codec: &Codec, entry: EncryptedEntry) -> Result<[BatchOp; 2], StoreError> {
    let (Ok(key), Ok(value)) = (
        std::str::from_utf8(&entry.encrypted_key),
        std::str::from_utf8(&entry.encrypted_value),
    ) else {
        return Err(StoreError::tampered("plaintext record is not valid UTF-8"));
    };
    let sealed = seal_entry(codec, key, value)?;
    Ok([BatchOp::Tombstone(entry.encrypted_key), BatchOp::Put(sealed)])
}

enum Lifecycle {
    Pending,
    Initializing,
    Ready(Protection),
    Failed(String),
    Closed,
}

/// Puts an abandoned initialization back to `Pending` so it can be retried.
struct InitAttempt<'a> {
    lifecycle: &'a RwLock<Lifecycle>,
    settled: bool,
}

impl InitAttempt<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for InitAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Ok(mut lifecycle) = self.lifecycle.try_write() {
            if matches!(*lifecycle, Lifecycle::Initializing) {
                *lifecycle = Lifecycle::Pending;
            }
        }
    }
}

/// Encrypted key/value store over an [`EntryStore`].
pub struct EncryptedStore<S: EntryStore> {
    name: String,
    entries: S,
    policy: FallbackPolicy,
    lifecycle: RwLock<Lifecycle>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl<S: EntryStore> EncryptedStore<S> {
    /// Create a handle that is not usable until [`initialize`](Self::initialize) runs.
    pub fn new(name: impl Into<String>, entries: S, policy: FallbackPolicy) -> Self {
        Self {
            name: name.into(),
            entries,
            policy,
            lifecycle: RwLock::new(Lifecycle::Pending),
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    /// Create and initialize in one step. Only fails under [`FallbackPolicy::FailClosed`].
    pub async fn open<P>(
        name: impl Into<String>,
        entries: S,
        key_provider: &P,
        policy: FallbackPolicy,
    ) -> Result<Self, StoreError>
    where
        P: KeyProvider + ?Sized,
    {
        let store = Self::new(name, entries, policy);
        store.initialize(key_provider).await?;
        Ok(store)
    }

    /// Obtain the root key and make the store usable.
    ///
    /// A no-op on a ready store. May be retried after a fail-closed failure. The
    /// lifecycle lock is not held while the provider runs, so operations issued in
    /// the meantime fail with `StoreUnavailable` instead of waiting.
    #[instrument(skip_all, fields(store = %self.name))]
    pub async fn initialize<P>(&self, key_provider: &P) -> Result<(), StoreError>
    where
        P: KeyProvider + ?Sized,
    {
        {
            let mut lifecycle = self.lifecycle.write().await;
            match &*lifecycle {
                Lifecycle::Ready(_) => return Ok(()),
                Lifecycle::Closed => return Err(StoreError::unavailable("store is closed")),
                Lifecycle::Initializing => {
                    return Err(StoreError::unavailable("store is already initializing"))
                }
                Lifecycle::Pending | Lifecycle::Failed(_) => {}
            }
            *lifecycle = Lifecycle::Initializing;
        }
        let attempt = InitAttempt {
            lifecycle: &self.lifecycle,
            settled: false,
        };

        let outcome = match self.obtain_codec(key_provider).await {
            Ok(codec) => {
                self.reseal_plaintext(&codec).await;
                Ok(Protection::Encrypted(codec))
            }
            Err(err) => match self.policy {
                FallbackPolicy::Plaintext => {
                    warn!(error = %err, "root key unavailable; using unencrypted storage");
                    self.record(Diagnostic {
                        kind: err.kind(),
                        message: format!(
                            "falling back to unencrypted storage: {}; entries written now stay \
                             in plaintext until a later initialization re-seals them",
                            err.reason()
                        ),
                    })
                    .await;
                    Ok(Protection::Plaintext)
                }
                FallbackPolicy::FailClosed => {
                    warn!(error = %err, "root key unavailable; store stays closed");
                    Err(err)
                }
            },
        };

        let mut lifecycle = self.lifecycle.write().await;
        attempt.settle();
        if matches!(*lifecycle, Lifecycle::Closed) {
            return Err(StoreError::unavailable("store was closed while initializing"));
        }
        match outcome {
            Ok(protection) => {
                let encrypted = matches!(protection, Protection::Encrypted(_));
                *lifecycle = Lifecycle::Ready(protection);
                info!(encrypted, "store ready");
                Ok(())
            }
            Err(err) => {
                *lifecycle = Lifecycle::Failed(err.reason().to_string());
                Err(err)
            }
        }
    }

    async fn obtain_codec<P>(&self, key_provider: &P) -> Result<Codec, StoreError>
    where
        P: KeyProvider + ?Sized,
    {
        let root = key_provider.obtain_root_key(&self.name).await?;
        Codec::new(&root)
    }

    /// Encrypt records left behind by an earlier plaintext fallback, in one batch.
    ///
    /// Plaintext records are the ones without a nonce. A failure leaves them in place
    /// and is recorded as a diagnostic; the store still comes up encrypted.
    async fn reseal_plaintext(&self, codec: &Codec) {
        let stranded = match self.entries.scan().await {
            Ok(all) => all
                .into_iter()
                .filter(|entry| entry.nonce.is_empty())
                .collect::<Vec<_>>(),
            Err(err) => {
                warn!(error = %err, "could not scan for plaintext records");
                return;
            }
        };
        if stranded.is_empty() {
            return;
        }

        let count = stranded.len();
        let batch = stranded
            .into_iter()
            .map(|entry| reseal(codec, entry))
            .collect::<Result<Vec<_>, _>>();

        let committed = match batch {
            Ok(batch) => self.entries.commit(batch.into_iter().flatten().collect()).await,
            Err(err) => Err(err),
        };
        match committed {
            Ok(()) => info!(count, "re-sealed records written during plaintext fallback"),
            Err(err) => {
                warn!(error = %err, count, "plaintext records could not be re-sealed");
                self.record(Diagnostic {
                    kind: err.kind(),
                    message: format!(
                        "{count} records written during a plaintext fallback remain \
                         unencrypted and cannot be read by key: {}",
                        err.reason()
                    ),
                })
                .await;
            }
        }
    }

    async fn record(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().await.push(diagnostic);
    }

    /// Stop serving requests. Waits for in-flight operations to finish.
    pub async fn close(&self) {
        *self.lifecycle.write().await = Lifecycle::Closed;
        debug!(store = %self.name, "store closed");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether entries are being sealed with the root key.
    pub async fn is_encrypted(&self) -> bool {
        matches!(
            &*self.lifecycle.read().await,
            Lifecycle::Ready(Protection::Encrypted(_))
        )
    }

    pub async fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().await.clone()
    }

    pub async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.multi_set(&[(key, value)]).await
    }

    /// Write all pairs in one atomic batch. Every pair is validated before anything
    /// is encrypted or written.
    #[instrument(skip_all, fields(store = %self.name, pairs = pairs.len()))]
    pub async fn multi_set<K, V>(&self, pairs: &[(K, V)]) -> Result<(), StoreError>
    where
        K: AsRef<str> + Sync,
        V: AsRef<str> + Sync,
    {
        let lifecycle = self.lifecycle.read().await;
        let protection = ready(&lifecycle)?;

        for (index, (key, _)) in pairs.iter().enumerate() {
            if key.as_ref().is_empty() {
                return Err(StoreError::invalid_pair(format!(
                    "pair {index} has an empty key"
                )));
            }
        }

        let batch = pairs
            .iter()
            .map(|(key, value)| protection.seal(key.as_ref(), value.as_ref()).map(BatchOp::Put))
            .collect::<Result<Vec<_>, _>>()?;
        self.entries.commit(batch).await
    }

    pub async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut found = self.multi_get(&[key]).await?;
        Ok(found.pop().and_then(|(_, value)| value))
    }

    /// Look up every key. Results keep the request order; absent keys map to `None`.
    #[instrument(skip_all, fields(store = %self.name, keys = keys.len()))]
    pub async fn multi_get<K>(
        &self,
        keys: &[K],
    ) -> Result<Vec<(String, Option<String>)>, StoreError>
    where
        K: AsRef<str> + Sync,
    {
        let lifecycle = self.lifecycle.read().await;
        let protection = ready(&lifecycle)?;

        let lookup = keys
            .iter()
            .map(|key| protection.lookup_key(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let found = self.entries.read(&lookup).await?;

        keys.iter()
            .zip(lookup)
            .map(|(key, encrypted_key)| {
                let value = match found.get(&encrypted_key).and_then(Option::as_ref) {
                    Some(entry) => Some(protection.open(entry)?),
                    None => None,
                };
                Ok((key.as_ref().to_string(), value))
            })
            .collect()
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.multi_remove(&[key]).await
    }

    /// Delete every key in one atomic batch. Absent keys are ignored.
    #[instrument(skip_all, fields(store = %self.name, keys = keys.len()))]
    pub async fn multi_remove<K>(&self, keys: &[K]) -> Result<(), StoreError>
    where
        K: AsRef<str> + Sync,
    {
        let lifecycle = self.lifecycle.read().await;
        let protection = ready(&lifecycle)?;

        let batch = keys
            .iter()
            .map(|key| protection.lookup_key(key.as_ref()).map(BatchOp::Tombstone))
            .collect::<Result<Vec<_>, _>>()?;
        self.entries.commit(batch).await
    }

    #[instrument(skip_all, fields(store = %self.name))]
    pub async fn clear(&self) -> Result<(), StoreError> {
        let lifecycle = self.lifecycle.read().await;
        ready(&lifecycle)?;
        self.entries.clear().await
    }
}

fn ready(lifecycle: &Lifecycle) -> Result<&Protection, StoreError> {
    match lifecycle {
        Lifecycle::Ready(protection) => Ok(protection),
        Lifecycle::Pending | Lifecycle::Initializing => {
            Err(StoreError::unavailable("store is still initializing"))
        }
        Lifecycle::Failed(reason) => Err(StoreError::unavailable(format!(
            "store failed to initialize: {reason}"
        ))),
        Lifecycle::Closed => Err(StoreError::unavailable("store is closed")),
    }
}
