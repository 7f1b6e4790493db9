//! Core abstractions for Sealbox: the error taxonomy and the entry store contract.
//! This crate is intentionally small and carries no cryptography.

pub mod error;
pub mod storage;
