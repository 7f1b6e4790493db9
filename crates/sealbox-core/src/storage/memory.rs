use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use async_trait::async_trait;
use tracing::debug;

use super::entry_store::{apply_batch, BatchOp, EncryptedEntry, EntryMap, EntryStore};
use crate::error::StoreError;

/// Entry store kept entirely in memory, for tests and ephemeral sessions.
///
/// Clones share the same underlying map. Commits swap in a fully built snapshot under
/// the write lock, so readers never see a partially applied batch.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEntryStore {
    inner: Arc<RwLock<Arc<EntryMap>>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent commits and clears fail with `PersistFailure` until reset.
    /// Simulates an I/O fault at the persistence boundary.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.snapshot().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored record, for inspection in tests.
    pub fn entries(&self) -> Vec<EncryptedEntry> {
        self.snapshot()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Result<Arc<EntryMap>, StoreError> {
        let guard = self
            .inner
            .read()
            .map_err(|err| StoreError::persist(format!("lock poisoned: {err}")))?;
        Ok(Arc::clone(&guard))
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::persist("simulated I/O fault"));
        }
        Ok(())
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn commit(&self, batch: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|err| StoreError::persist(format!("lock poisoned: {err}")))?;
        self.check_fault()?;

        let mut staged = EntryMap::clone(&guard);
        let ops = batch.len();
        if apply_batch(&mut staged, batch) {
            *guard = Arc::new(staged);
        }
        debug!(ops, "committed batch to memory");
        Ok(())
    }

    async fn read(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, Option<EncryptedEntry>>, StoreError> {
        let snapshot = self.snapshot()?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), snapshot.get(key).cloned()))
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|err| StoreError::persist(format!("lock poisoned: {err}")))?;
        self.check_fault()?;
        if !guard.is_empty() {
            *guard = Arc::new(EntryMap::new());
        }
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<EncryptedEntry>, StoreError> {
        Ok(self.snapshot()?.values().cloned().collect())
    }
}
