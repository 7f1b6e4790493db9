use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag carried by every error that crosses the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidPair,
    PersistFailure,
    TamperedData,
    StoreUnavailable,
    KeyUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPair => "InvalidPair",
            ErrorKind::PersistFailure => "PersistFailure",
            ErrorKind::TamperedData => "TamperedData",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::KeyUnavailable => "KeyUnavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the store and its collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Caller input was malformed; nothing was written.
    #[error("invalid key/value pair: {reason}")]
    InvalidPair { reason: String },
    /// The persistence layer failed; the batch had no effect.
    #[error("persist failure: {reason}")]
    PersistFailure { reason: String },
    /// A stored record failed authentication.
    #[error("tampered data: {reason}")]
    TamperedData { reason: String },
    /// The store is not initialized, failed to initialize, or was closed.
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },
    /// Root key material could not be obtained.
    #[error("key unavailable: {reason}")]
    KeyUnavailable { reason: String },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidPair { .. } => ErrorKind::InvalidPair,
            StoreError::PersistFailure { .. } => ErrorKind::PersistFailure,
            StoreError::TamperedData { .. } => ErrorKind::TamperedData,
            StoreError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            StoreError::KeyUnavailable { .. } => ErrorKind::KeyUnavailable,
        }
    }

    /// Reason text without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            StoreError::InvalidPair { reason }
            | StoreError::PersistFailure { reason }
            | StoreError::TamperedData { reason }
            | StoreError::StoreUnavailable { reason }
            | StoreError::KeyUnavailable { reason } => reason,
        }
    }

    pub fn invalid_pair(reason: impl Into<String>) -> Self {
        StoreError::InvalidPair {
            reason: reason.into(),
        }
    }

    pub fn persist<E: ToString>(err: E) -> Self {
        StoreError::PersistFailure {
            reason: err.to_string(),
        }
    }

    pub fn tampered(reason: impl Into<String>) -> Self {
        StoreError::TamperedData {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::StoreUnavailable {
            reason: reason.into(),
        }
    }

    pub fn key_unavailable(reason: impl Into<String>) -> Self {
        StoreError::KeyUnavailable {
            reason: reason.into(),
        }
    }
}
