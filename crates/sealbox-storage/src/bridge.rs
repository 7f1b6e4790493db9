//! Asynchronous call surface for a host runtime binding.
//!
//! Each store operation maps to one [`BridgeCall`]. Dispatch always produces a
//! [`BridgeReply`]: `resolved` with the operation's value, or `rejected` with an
//! error kind tag and a human-readable message.

use sealbox_core::{
    error::{ErrorKind, StoreError},
    storage::EntryStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::encrypted_store::EncryptedStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum BridgeCall {
    SetItem { key: String, value: String },
    GetItem { key: String },
    /// Pairs arrive unvalidated; each must be a two-element array of strings.
    MultiSet { pairs: Vec<Value> },
    MultiGet { keys: Vec<String> },
    RemoveItem { key: String },
    MultiRemove { keys: Vec<String> },
    Clear,
}

impl BridgeCall {
    pub fn method(&self) -> &'static str {
        match self {
            BridgeCall::SetItem { .. } => "setItem",
            BridgeCall::GetItem { .. } => "getItem",
            BridgeCall::MultiSet { .. } => "multiSet",
            BridgeCall::MultiGet { .. } => "multiGet",
            BridgeCall::RemoveItem { .. } => "removeItem",
            BridgeCall::MultiRemove { .. } => "multiRemove",
            BridgeCall::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BridgeReply {
    Resolved { value: Value },
    Rejected { error: BridgeError },
}

impl BridgeReply {
    pub fn is_resolved(&self) -> bool {
        matches!(self, BridgeReply::Resolved { .. })
    }
}

/// Run one call against the store.
#[instrument(skip_all, fields(method = call.method(), store = store.name()))]
pub async fn dispatch<S: EntryStore>(store: &EncryptedStore<S>, call: BridgeCall) -> BridgeReply {
    let outcome = match call {
        BridgeCall::SetItem { key, value } => store
            .set_item(&key, &value)
            .await
            .map(|()| Value::String(value)),
        BridgeCall::GetItem { key } => store
            .get_item(&key)
            .await
            .map(|value| value.map_or(Value::Null, Value::String)),
        BridgeCall::MultiSet { pairs } => match parse_pairs(&pairs) {
            Ok(pairs) => store.multi_set(&pairs).await.map(|()| Value::Null),
            Err(err) => Err(err),
        },
        BridgeCall::MultiGet { keys } => store.multi_get(&keys).await.map(|found| {
            Value::Array(
                found
                    .into_iter()
                    .map(|(key, value)| {
                        Value::Array(vec![
                            Value::String(key),
                            value.map_or(Value::Null, Value::String),
                        ])
                    })
                    .collect(),
            )
        }),
        BridgeCall::RemoveItem { key } => store
            .remove_item(&key)
            .await
            .map(|()| Value::String(key)),
        BridgeCall::MultiRemove { keys } => store.multi_remove(&keys).await.map(|()| Value::Null),
        BridgeCall::Clear => store.clear().await.map(|()| Value::Null),
    };

    match outcome {
        Ok(value) => BridgeReply::Resolved { value },
        Err(err) => {
            debug!(kind = %err.kind(), "call rejected");
            BridgeReply::Rejected { error: err.into() }
        }
    }
}

/// Validate every raw pair before anything is written.
fn parse_pairs(raw: &[Value]) -> Result<Vec<(String, String)>, StoreError> {
    raw.iter()
        .enumerate()
        .map(|(index, pair)| {
            let items = pair.as_array().ok_or_else(|| {
                StoreError::invalid_pair(format!("pair {index} is not an array"))
            })?;
            if items.len() != 2 {
                return Err(StoreError::invalid_pair(format!(
                    "expected key/value pair to have length of 2 but was {}",
                    items.len()
                )));
            }
            match (&items[0], &items[1]) {
                (Value::String(key), Value::String(value)) => Ok((key.clone(), value.clone())),
                _ => Err(StoreError::invalid_pair(format!(
                    "pair {index} must contain a string key and a string value"
                ))),
            }
        })
        .collect()
}
