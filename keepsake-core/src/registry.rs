/*!
Instance registry: at most one live [`SaveData`] per content source.
*/

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cipher::{AesCipher, Cipher};
use crate::config::SaveConfig;
use crate::keys::KeyMaterial;
use crate::save_data::{ContentSource, SaveData, SaveOutcome, SaveSettings};
use crate::serializer::DocumentSerializer;
use crate::storage::SaveStorage;
use crate::Result;

#[cfg(feature = "local")]
use crate::storage::LocalFileStorage;

/// Owns the cached save-data instances of an application
///
/// Instances are keyed by their exact content-source string, so a file source and a
/// literal source with the same text share one entry. The registry is not synchronized;
/// wrap it in a lock if several threads need it.
///
/// # Example
/// ```rust
/// use keepsake_core::{AesCipher, ContentSource, DocumentSerializer, KeyMaterial, MemoryStorage, SaveConfig, SaveRegistry};
///
/// let mut registry = SaveRegistry::new(
///     SaveConfig::default(),
///     MemoryStorage::new(),
///     AesCipher::new(),
///     KeyMaterial::generate(16),
///     DocumentSerializer::default(),
/// );
///
/// registry
///     .get_or_create(ContentSource::file("Profile"), false)
///     .write("Highscore", &42)?;
/// let again = registry.get_or_create(ContentSource::file("Profile"), false);
/// assert_eq!(again.read("Highscore", 0), 42);
/// # Ok::<(), keepsake_core::SaveError>(())
/// ```
pub struct SaveRegistry<S: SaveStorage, C: Cipher = AesCipher> {
    config: SaveConfig,
    storage: S,
    cipher: C,
    keys: Arc<KeyMaterial>,
    serializer: Arc<DocumentSerializer>,
    instances: HashMap<String, SaveData<S, C>>,
}

#[cfg(feature = "local")]
impl SaveRegistry<LocalFileStorage> {
    /// Registry over the save directory in `config`, using AES and the default serializer layout
    pub fn from_config(config: SaveConfig, keys: KeyMaterial) -> Result<Self> {
        config.validate()?;
        keys.validate()?;
        let storage = LocalFileStorage::from_config(&config);
        let serializer = DocumentSerializer::new(config.formatting);
        Ok(Self::new(config, storage, AesCipher::new(), keys, serializer))
    }
}

impl<S, C> SaveRegistry<S, C>
where
    S: SaveStorage + Clone,
    C: Cipher + Clone,
{
    pub fn new(
        config: SaveConfig,
        storage: S,
        cipher: C,
        keys: KeyMaterial,
        serializer: DocumentSerializer,
    ) -> Self {
        Self {
            config,
            storage,
            cipher,
            keys: Arc::new(keys),
            serializer: Arc::new(serializer),
            instances: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    /// Key material handed to newly created instances
    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// Replace the key material for instances created from now on
    ///
    /// Cached instances keep the material they were created with.
    pub fn set_keys(&mut self, keys: KeyMaterial) {
        if !self.instances.is_empty() {
            warn!(
                cached = self.instances.len(),
                "Key material replaced; cached instances keep their previous keys"
            );
        }
        self.keys = Arc::new(keys);
    }

    /// Return the instance bound to `source`, creating and loading it on first use
    ///
    /// `use_security` only applies when the instance is created.
    pub fn get_or_create(&mut self, source: ContentSource, use_security: bool) -> &mut SaveData<S, C> {
        match self.instances.entry(source.as_str().to_string()) {
            Entry::Occupied(entry) => {
                let data = entry.into_mut();
                if data.settings().use_security != use_security {
                    warn!(
                        source = %source.as_str(),
                        cached = data.settings().use_security,
                        requested = use_security,
                        "Returning cached instance with a different security setting"
                    );
                }
                data
            }
            Entry::Vacant(entry) => {
                let settings = SaveSettings::new(
                    self.storage.clone(),
                    self.cipher.clone(),
                    self.keys.clone(),
                )
                .with_serializer(self.serializer.clone())
                .with_security(use_security)
                .with_config(&self.config);

                let data = SaveData::new(source, settings);
                debug!(instance = ?data, "Save data instance created");
                entry.insert(data)
            }
        }
    }

    /// Look up a cached instance without creating one
    pub fn get(&self, source: &str) -> Option<&SaveData<S, C>> {
        let found = self.instances.get(source);
        if found.is_none() {
            debug!(source, "No cached save data instance");
        }
        found
    }

    pub fn get_mut(&mut self, source: &str) -> Option<&mut SaveData<S, C>> {
        let found = self.instances.get_mut(source);
        if found.is_none() {
            debug!(source, "No cached save data instance");
        }
        found
    }

    pub fn contains(&self, source: &str) -> bool {
        self.instances.contains_key(source)
    }

    /// Drop an instance from the cache without saving it
    pub fn evict(&mut self, source: &str) -> Option<SaveData<S, C>> {
        self.instances.remove(source)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Content-source strings of all cached instances, sorted
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.instances.keys().cloned().collect();
        sources.sort();
        sources
    }

    /// Save every cached file-backed instance
    ///
    /// Failures are logged per instance and never stop the sweep. Returns the outcome
    /// for each saved source, sorted by source.
    pub fn save_all(&mut self) -> Vec<(String, SaveOutcome)> {
        let mut report = Vec::new();
        for (source, data) in self.instances.iter_mut() {
            if data.is_literal() {
                continue;
            }
            let outcome = data.commit();
            if let SaveOutcome::Failed(reason) = &outcome {
                error!(source = %source, reason = %reason, "Autosave failed");
            }
            report.push((source.clone(), outcome));
        }
        report.sort_by(|a, b| a.0.cmp(&b.0));

        let written = report
            .iter()
            .filter(|(_, outcome)| *outcome == SaveOutcome::Written)
            .count();
        info!(instances = report.len(), written, "Autosave sweep complete");
        report
    }
}

impl<S: SaveStorage, C: Cipher> fmt::Debug for SaveRegistry<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveRegistry")
            .field("save_dir", &self.config.save_dir)
            .field("instances", &self.instances.len())
            .field("serializer", &self.serializer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Formatting;
    use crate::save_data::LoadOutcome;
    use crate::storage::MemoryStorage;
    use crate::SaveError;
    use tempfile::TempDir;

    fn registry(storage: &MemoryStorage, config: SaveConfig) -> SaveRegistry<MemoryStorage> {
        SaveRegistry::new(
            config,
            storage.clone(),
            AesCipher::new(),
            KeyMaterial::generate(16),
            DocumentSerializer::new(Formatting::Compact),
        )
    }

    #[test]
    fn test_one_instance_per_source() {
        let storage = MemoryStorage::new();
        let mut registry = registry(&storage, SaveConfig::default());

        registry
            .get_or_create(ContentSource::file("Slot"), false)
            .write("a", &1)
            .unwrap();
        let again = registry.get_or_create(ContentSource::file("Slot"), false);
        assert_eq!(again.read("a", 0), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_file_and_literal_share_key() {
        let storage = MemoryStorage::new();
        let mut registry = registry(&storage, SaveConfig::default());

        registry.get_or_create(ContentSource::file("Shared"), false);
        let cached = registry.get_or_create(ContentSource::literal("Shared"), false);
        assert!(!cached.is_literal());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_security_setting_of_first_creation_wins() {
        let storage = MemoryStorage::new();
        let mut registry = registry(&storage, SaveConfig::default());

        registry.get_or_create(ContentSource::file("Slot"), true);
        let cached = registry.get_or_create(ContentSource::file("Slot"), false);
        assert!(cached.settings().use_security);
    }

    #[test]
    fn test_lookup_and_evict() {
        let storage = MemoryStorage::new();
        let mut registry = registry(&storage, SaveConfig::default());
        assert!(registry.is_empty());
        assert!(registry.get("Slot").is_none());

        registry
            .get_or_create(ContentSource::file("Slot"), false)
            .write("a", &1)
            .unwrap();
        assert!(registry.contains("Slot"));
        assert!(registry.get_mut("Slot").is_some());

        let evicted = registry.evict("Slot").unwrap();
        assert_eq!(evicted.item_count(), 1);
        assert!(!registry.contains("Slot"));
        assert_eq!(storage.raw("Slot").as_deref(), Some(""));
    }

    #[test]
    fn test_save_all_skips_literals() {
        let storage = MemoryStorage::new();
        let mut registry = registry(&storage, SaveConfig::default());

        registry
            .get_or_create(ContentSource::file("B"), false)
            .write("b", &2)
            .unwrap();
        registry.get_or_create(ContentSource::file("A"), false);
        registry
            .get_or_create(ContentSource::literal("{}"), false)
            .write("lit", &true)
            .unwrap();

        let report = registry.save_all();
        assert_eq!(
            report,
            vec![
                ("A".to_string(), SaveOutcome::Written),
                ("B".to_string(), SaveOutcome::Written),
            ]
        );
        assert_eq!(storage.raw("A").as_deref(), Some("{}"));
        assert_eq!(storage.raw("B").as_deref(), Some(r#"{"b":2}"#));
        assert_eq!(registry.sources(), vec!["A", "B", "{}"]);

        let again = registry.save_all();
        assert!(again.iter().all(|(_, o)| *o == SaveOutcome::Unchanged));
    }

    #[test]
    fn test_save_on_modification_policy() {
        let storage = MemoryStorage::new();
        let config = SaveConfig {
            save_on_modification: true,
            ..SaveConfig::default()
        };
        let mut registry = registry(&storage, config);

        registry
            .get_or_create(ContentSource::file("Auto"), false)
            .write("a", &1)
            .unwrap();
        assert_eq!(storage.raw("Auto").as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_new_keys_apply_to_new_instances_only() {
        let storage = MemoryStorage::new();
        let mut registry = registry(&storage, SaveConfig::default());

        let first = registry.get_or_create(ContentSource::file("Secure"), true);
        first.write("a", &1).unwrap();
        first.save();

        registry.set_keys(KeyMaterial::generate(16));
        assert!(registry.get("Secure").is_some());

        registry.evict("Secure");
        let reloaded = registry.get_or_create(ContentSource::file("Secure"), true);
        assert!(matches!(
            reloaded.load_outcome(),
            LoadOutcome::DecryptFailed { backup: Some(_), .. }
        ));
    }

    #[test]
    fn test_from_config_uses_save_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = SaveConfig::with_save_dir(temp_dir.path());
        let mut registry = SaveRegistry::from_config(config, KeyMaterial::generate(16)).unwrap();

        let data = registry.get_or_create(ContentSource::file("Profile"), false);
        data.write("Name", &"Ada").unwrap();
        assert_eq!(data.save(), "Content saved to: Profile.json");
        assert!(temp_dir.path().join("Profile.json").is_file());
    }

    #[test]
    fn test_save_all_continues_after_a_failed_write() {
        let temp_dir = TempDir::new().unwrap();
        let config = SaveConfig::with_save_dir(temp_dir.path());
        let mut registry = SaveRegistry::from_config(config, KeyMaterial::generate(16)).unwrap();

        registry
            .get_or_create(ContentSource::file("A"), false)
            .write("a", &1)
            .unwrap();
        registry
            .get_or_create(ContentSource::file("B"), false)
            .write("b", &2)
            .unwrap();

        // A directory in place of the save file makes the write fail
        let blocked = temp_dir.path().join("B.json");
        std::fs::remove_file(&blocked).unwrap();
        std::fs::create_dir(&blocked).unwrap();

        let report = registry.save_all();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0], ("A".to_string(), SaveOutcome::Written));
        assert_eq!(report[1].0, "B");
        assert!(matches!(report[1].1, SaveOutcome::Failed(_)));
        assert!(temp_dir.path().join("A.json").is_file());
        assert!(!registry.get("B").unwrap().is_clean());
    }

    #[test]
    fn test_from_config_rejects_invalid_input() {
        let config = SaveConfig {
            key_size: 20,
            ..SaveConfig::default()
        };
        assert!(matches!(
            SaveRegistry::from_config(config, KeyMaterial::generate(16)),
            Err(SaveError::Validation(_))
        ));

        let bad_keys = KeyMaterial::new("short", "short");
        assert!(SaveRegistry::from_config(SaveConfig::default(), bad_keys).is_err());
    }
}
