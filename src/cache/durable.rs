//! Durable Storage Module
//!
//! Named string items that survive a restart: one file per item on disk, or
//! a plain map for tests. Every call can fail (full disk, missing directory);
//! callers treat failures as "nothing stored".

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;

const ITEM_EXTENSION: &str = "json";

/// Minimal named-item storage, shaped like browser local storage.
pub trait DurableStorage: Send + Sync {
    fn get_item(&self, name: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, name: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, name: &str) -> Result<(), StorageError>;
    /// Names of every stored item.
    fn item_names(&self) -> Result<Vec<String>, StorageError>;
}

// == File Storage ==
/// One file per item under a directory.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Opens (creating if needed) the storage directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.{ITEM_EXTENSION}")))
    }
}

impl DurableStorage for FileStorage {
    fn get_item(&self, name: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(name)?) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            // Non-UTF-8 bytes are corruption; hand back something unparsable.
            Err(e) if e.kind() == ErrorKind::InvalidData => Ok(Some(String::new())),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        // Write-then-rename so a crash never leaves a half-written item.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn item_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ITEM_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

// == Memory Storage ==
/// In-process storage; survives nothing but is shareable between stores in
/// tests to simulate a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStorage for MemoryStorage {
    fn get_item(&self, name: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        Ok(items.get(name).cloned())
    }

    fn set_item(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        items.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        items.remove(name);
        Ok(())
    }

    fn item_names(&self) -> Result<Vec<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        Ok(items.keys().cloned().collect())
    }
}

impl<T: DurableStorage + ?Sized> DurableStorage for std::sync::Arc<T> {
    fn get_item(&self, name: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(name)
    }

    fn set_item(&self, name: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(name, value)
    }

    fn remove_item(&self, name: &str) -> Result<(), StorageError> {
        (**self).remove_item(name)
    }

    fn item_names(&self) -> Result<Vec<String>, StorageError> {
        (**self).item_names()
    }
}
