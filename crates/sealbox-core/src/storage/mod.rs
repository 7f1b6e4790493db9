//! Persisted entry model and the durable entry store contract.

mod entry_store;
mod memory;

pub use entry_store::{apply_batch, BatchOp, EncryptedEntry, EntryMap, EntryStore};
pub use memory::InMemoryEntryStore;
