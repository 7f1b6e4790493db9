use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;

/// Persisted form of one key/value pair.
///
/// `encrypted_key` is deterministic for a given plaintext key and root key, so it
/// doubles as the lookup key. `nonce` is empty for records written in plaintext mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEntry {
    pub encrypted_key: Vec<u8>,
    pub encrypted_value: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// One step of a commit batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite the entry under its encrypted key.
    Put(EncryptedEntry),
    /// Delete whatever is stored under the encrypted key.
    Tombstone(Vec<u8>),
}

impl BatchOp {
    pub fn encrypted_key(&self) -> &[u8] {
        match self {
            BatchOp::Put(entry) => &entry.encrypted_key,
            BatchOp::Tombstone(key) => key,
        }
    }
}

/// Map from encrypted key to its record.
pub type EntryMap = HashMap<Vec<u8>, EncryptedEntry>;

/// Durable mapping from encrypted key to encrypted entry.
///
/// Implementations must apply a batch all-or-nothing: a reader observes either the
/// state before the batch or the state after it, and a failed commit leaves the
/// store untouched. Writers are serialized; readers may run concurrently.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Apply the batch in order, atomically.
    async fn commit(&self, batch: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Look up each requested key; absent keys map to `None`.
    async fn read(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, Option<EncryptedEntry>>, StoreError>;

    /// Remove every entry atomically.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Every stored record, taken from one consistent snapshot.
    async fn scan(&self) -> Result<Vec<EncryptedEntry>, StoreError>;
}

/// Apply `batch` to `map` in order. Returns whether anything changed.
pub fn apply_batch(map: &mut EntryMap, batch: Vec<BatchOp>) -> bool {
    let mut changed = false;
    for op in batch {
        match op {
            BatchOp::Put(entry) => {
                let previous = map.insert(entry.encrypted_key.clone(), entry.clone());
                changed |= previous.as_ref() != Some(&entry);
            }
            BatchOp::Tombstone(key) => {
                changed |= map.remove(&key).is_some();
            }
        }
    }
    changed
}
