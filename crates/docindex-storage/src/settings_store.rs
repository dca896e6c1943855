//! Durable key/value settings contract.
//!
//! Every operation is durable when it returns; implementations must not
//! buffer writes client-side. Writes are last-writer-wins.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StorageError;

/// Small durable key/value table.
pub trait SettingsStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Convenience: read a UTF-8 value.
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.get(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

/// In-memory settings table.
#[derive(Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, StorageError> {
        self.entries
            .lock()
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))
    }
}

impl SettingsStore for MemorySettingsStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
