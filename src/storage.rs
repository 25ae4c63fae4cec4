//! Key-value storage used to persist tokens, nonces and the session state.

use codee::{Decoder, Encoder};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

/// Synchronous string key-value store.
///
/// Implement this to persist tokens somewhere other than process memory.
pub trait OAuthStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: String);
    fn remove_item(&self, key: &str);
}

/// Process-local storage. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OAuthStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_item(&self, key: &str, value: String) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value);
    }

    fn remove_item(&self, key: &str) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Typed access to an [`OAuthStorage`] under a common key prefix.
#[derive(Clone)]
pub(crate) struct TypedStorage {
    storage: Arc<dyn OAuthStorage>,
    prefix: String,
}

impl TypedStorage {
    pub(crate) fn new(storage: Arc<dyn OAuthStorage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Values which no longer decode are removed and reported as absent.
    pub(crate) fn read<T, C>(&self, key: &str) -> Option<T>
    where
        C: Decoder<T, Encoded = str>,
        <C as Decoder<T>>::Error: Debug,
    {
        let key = self.key(key);
        let raw = self.storage.get_item(&key)?;
        match C::decode(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(
                    ?err,
                    "Data format of '{key}' changed. Removing previously persisted value."
                );
                self.storage.remove_item(&key);
                None
            }
        }
    }

    pub(crate) fn write<T, C>(&self, key: &str, value: &T)
    where
        C: Encoder<T, Encoded = String>,
        <C as Encoder<T>>::Error: Debug,
    {
        let key = self.key(key);
        match C::encode(value) {
            Ok(encoded) => self.storage.set_item(&key, encoded),
            Err(err) => tracing::error!(?err, "Error writing '{key}' to storage."),
        }
    }

    pub(crate) fn remove(&self, key: &str) {
        self.storage.remove_item(&self.key(key));
    }
}
