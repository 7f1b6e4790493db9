use std::{
    collections::HashMap,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sealbox_core::{
    error::StoreError,
    storage::{apply_batch, BatchOp, EncryptedEntry, EntryMap, EntryStore},
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// File-backed entry store: one JSON document per store, replaced atomically on commit.
///
/// Readers work from an in-memory snapshot that is swapped only after the new file has
/// been renamed into place, so they observe either the old or the new state.
pub struct FileEntryStore {
    path: PathBuf,
    snapshot: RwLock<Arc<EntryMap>>,
    writer: Mutex<()>,
}

impl FileEntryStore {
    /// Open (or lazily create) the store file at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match read_document(&path)? {
            Some(doc) => decode_document(doc)?,
            None => EntryMap::new(),
        };
        debug!(entries = entries.len(), "opened entry store");

        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(entries)),
            writer: Mutex::new(()),
        })
    }

    /// Store file location for a named store inside `dir`.
    pub fn path_for(dir: impl AsRef<Path>, store_name: &str) -> PathBuf {
        dir.as_ref()
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(store_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current(&self) -> Result<Arc<EntryMap>, StoreError> {
        let guard = self
            .snapshot
            .read()
            .map_err(|err| StoreError::persist(format!("lock poisoned: {err}")))?;
        Ok(Arc::clone(&guard))
    }

    fn publish(&self, entries: EntryMap) -> Result<(), StoreError> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|err| StoreError::persist(format!("lock poisoned: {err}")))?;
        *guard = Arc::new(entries);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredDocument {
    entries: Vec<StoredRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: String,
    nonce: String,
}

#[async_trait]
impl EntryStore for FileEntryStore {
    #[instrument(skip_all, fields(ops = batch.len()))]
    async fn commit(&self, batch: Vec<BatchOp>) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;

        let mut staged = EntryMap::clone(&*self.current()?);
        if !apply_batch(&mut staged, batch) {
            debug!("batch changed nothing; skipping write");
            return Ok(());
        }

        write_document(&self.path, &encode_document(&staged))?;
        self.publish(staged)?;
        debug!("committed batch");
        Ok(())
    }

    async fn read(
        &self,
        keys: &[Vec<u8>],
    ) -> Result<HashMap<Vec<u8>, Option<EncryptedEntry>>, StoreError> {
        let snapshot = self.current()?;
        Ok(keys
            .iter()
            .map(|key| (key.clone(), snapshot.get(key).cloned()))
            .collect())
    }

    #[instrument(skip_all)]
    async fn clear(&self) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;

        if self.current()?.is_empty() {
            return Ok(());
        }

        write_document(&self.path, &StoredDocument::default())?;
        self.publish(EntryMap::new())?;
        debug!("cleared entry store");
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<EncryptedEntry>, StoreError> {
        Ok(self.current()?.values().cloned().collect())
    }
}

fn encode_document(entries: &EntryMap) -> StoredDocument {
    StoredDocument {
        entries: entries
            .values()
            .map(|entry| StoredRecord {
                key: URL_SAFE_NO_PAD.encode(&entry.encrypted_key),
                value: URL_SAFE_NO_PAD.encode(&entry.encrypted_value),
                nonce: URL_SAFE_NO_PAD.encode(&entry.nonce),
            })
            .collect(),
    }
}

fn decode_document(doc: StoredDocument) -> Result<EntryMap, StoreError> {
    let mut entries = EntryMap::with_capacity(doc.entries.len());
    for record in doc.entries {
        let entry = EncryptedEntry {
            encrypted_key: decode_field("key", &record.key)?,
            encrypted_value: decode_field("value", &record.value)?,
            nonce: decode_field("nonce", &record.nonce)?,
        };
        entries.insert(entry.encrypted_key.clone(), entry);
    }
    Ok(entries)
}

fn decode_field(field: &str, encoded: &str) -> Result<Vec<u8>, StoreError> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| StoreError::persist(format!("corrupt store file ({field}): {e}")))
}

fn write_document(path: &Path, doc: &StoredDocument) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::persist("invalid storage path"))?;
    fs::create_dir_all(parent).map_err(StoreError::persist)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StoreError::persist)?;
    let json = serde_json::to_vec(doc).map_err(StoreError::persist)?;
    tmp.write_all(&json).map_err(StoreError::persist)?;
    tmp.flush().map_err(StoreError::persist)?;
    tmp.as_file().sync_all().map_err(StoreError::persist)?;
    tmp.persist(path).map_err(|e| StoreError::persist(e.error))?;
    Ok(())
}

fn read_document(path: &Path) -> Result<Option<StoredDocument>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::persist(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(StoreError::persist)?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(|e| StoreError::persist(format!("corrupt store file: {e}")))
}
