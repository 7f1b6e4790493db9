//! Concrete store implementations with encryption at rest.
//! Keys come from the OS keyring (or test doubles); entries are sealed with AES-GCM
//! and persisted to a single file per store.

pub mod bridge;
pub mod codec;
pub mod encrypted_store;
pub mod file_entry_store;
pub mod key_provider;
