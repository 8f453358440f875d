//! Persisted key-value storage: the desktop stand-in for browser local storage.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
}

pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key inside a directory, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    writer: AtomicFileWriter,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir.into()),
        }
    }

    fn filename(key: &str) -> String {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{safe}.json")
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.writer.dir().join(Self::filename(key));
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.writer.write(&Self::filename(key), value.as_bytes())?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.writer.remove(&Self::filename(key))?;
        Ok(())
    }
}

/// In-memory storage with an optional byte quota across all values.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            items: Mutex::default(),
            quota: Some(quota),
        }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items();
        if let Some(quota) = self.quota {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items().remove(key);
        Ok(())
    }
}

/// Storage that refuses every access, as in a locked-down private session.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStorage;

impl KeyValueStorage for DisabledStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage is disabled".into()))
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage is disabled".into()))
    }

    fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage is disabled".into()))
    }
}
