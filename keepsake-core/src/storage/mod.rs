/*!
Storage adapters for save-file persistence.

This module defines the storage abstraction (port) and concrete implementations (adapters).
The save-data core only ever talks to [`SaveStorage`], so the same document logic runs
against the local filesystem or against a purely in-memory map.
*/

#[cfg(feature = "local")]
pub mod local;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{assign_extension, FileExtension};
use crate::{Result, SaveError};

#[cfg(feature = "local")]
pub use local::LocalFileStorage;

/// Storage abstraction for loading and saving raw save-file text
///
/// Names passed to every method are save-file names as given by the caller; adapters
/// assign their default extension to names that do not carry one.
#[cfg_attr(test, mockall::automock)]
pub trait SaveStorage {
    /// The stored name for `name`, with the default extension assigned if missing
    fn file_name(&self, name: &str) -> String;

    /// Full filesystem location of `name`, if the adapter is file-backed
    fn location(&self, name: &str) -> Option<PathBuf>;

    /// Check if a save file exists
    fn exists(&self, name: &str) -> bool;

    /// Load the raw text of a save file
    ///
    /// A missing save file is created empty and yields empty text.
    fn load(&self, name: &str) -> Result<String>;

    /// Save raw text, replacing any previous content
    fn save(&self, name: &str, content: &str) -> Result<()>;

    /// Create a new save file with `content`
    ///
    /// Returns `false` without touching anything if the file already exists.
    fn create(&self, name: &str, content: &str) -> Result<bool>;

    /// Copy the raw content of `from` into a new save file `to`, byte for byte
    ///
    /// Returns `false` without touching anything if `to` already exists.
    fn copy(&self, from: &str, to: &str) -> Result<bool>;

    /// Delete a save file
    ///
    /// Returns `false` if there was nothing to delete.
    fn delete(&self, name: &str) -> Result<bool>;
}

/// Memory-based storage adapter
///
/// Stores save files in a shared in-memory map. Clones share the same map, so several
/// save-data instances (or a test and the instance under test) see each other's writes.
/// Useful for unit testing and for hosts without filesystem access.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    extension: FileExtension,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an in-memory adapter assigning `extension` to bare names
    pub fn with_extension(extension: FileExtension) -> Self {
        Self {
            entries: Arc::default(),
            extension,
        }
    }

    /// Raw stored text for `name`, if present
    pub fn raw(&self, name: &str) -> Option<String> {
        let key = self.file_name(name);
        self.lock().ok()?.get(&key).cloned()
    }

    /// Names of all stored save files
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| SaveError::storage(format!("memory storage lock poisoned: {e}")))
    }
}

impl SaveStorage for MemoryStorage {
    fn file_name(&self, name: &str) -> String {
        assign_extension(name, self.extension)
    }

    fn location(&self, _name: &str) -> Option<PathBuf> {
        None
    }

    fn exists(&self, name: &str) -> bool {
        let key = self.file_name(name);
        self.lock()
            .map(|entries| entries.contains_key(&key))
            .unwrap_or(false)
    }

    fn load(&self, name: &str) -> Result<String> {
        let key = self.file_name(name);
        let mut entries = self.lock()?;
        Ok(entries.entry(key).or_default().clone())
    }

    fn save(&self, name: &str, content: &str) -> Result<()> {
        let key = self.file_name(name);
        self.lock()?.insert(key, content.to_string());
        Ok(())
    }

    fn create(&self, name: &str, content: &str) -> Result<bool> {
        let key = self.file_name(name);
        let mut entries = self.lock()?;
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, content.to_string());
        Ok(true)
    }

    fn copy(&self, from: &str, to: &str) -> Result<bool> {
        let (from, to) = (self.file_name(from), self.file_name(to));
        let mut entries = self.lock()?;
        if entries.contains_key(&to) {
            return Ok(false);
        }
        let content = entries
            .get(&from)
            .cloned()
            .ok_or_else(|| SaveError::storage(format!("no save file named {from}")))?;
        entries.insert(to, content);
        Ok(true)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let key = self.file_name(name);
        Ok(self.lock()?.remove(&key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();

        assert!(!storage.exists("Profile"));
        assert_eq!(storage.load("Profile").unwrap(), "");
        assert!(storage.exists("Profile"));
        assert!(storage.exists("Profile.json"));

        storage.save("Profile", "{\"a\":1}").unwrap();
        assert_eq!(storage.raw("Profile.json").as_deref(), Some("{\"a\":1}"));

        assert!(storage.delete("Profile").unwrap());
        assert!(!storage.delete("Profile").unwrap());
        assert!(!storage.exists("Profile"));
    }

    #[test]
    fn test_memory_storage_create_never_overwrites() {
        let storage = MemoryStorage::with_extension(FileExtension::Txt);

        assert!(storage.create("Slot", "first").unwrap());
        assert!(!storage.create("Slot.txt", "second").unwrap());
        assert_eq!(storage.raw("Slot").as_deref(), Some("first"));
        assert_eq!(storage.names(), vec!["Slot.txt".to_string()]);
    }

    #[test]
    fn test_memory_storage_copy() {
        let storage = MemoryStorage::new();
        storage.save("Slot", "original").unwrap();

        assert!(storage.copy("Slot", "Slot-backup0").unwrap());
        assert!(!storage.copy("Slot", "Slot-backup0.json").unwrap());
        assert_eq!(storage.raw("Slot-backup0").as_deref(), Some("original"));
        assert!(storage.copy("Missing", "Other").is_err());
    }

    #[test]
    fn test_memory_storage_clones_share_entries() {
        let storage = MemoryStorage::new();
        let other = storage.clone();

        storage.save("Shared", "content").unwrap();
        assert_eq!(other.load("Shared").unwrap(), "content");
        assert!(other.location("Shared").is_none());
    }
}
