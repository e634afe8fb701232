/*!
The save-data core: one in-memory document bound to one content source.

[`SaveData`] loads its document once at construction, mediates typed reads and writes by
key, decides whether content is encrypted, and persists the document on [`SaveData::save`].
Load and save never fail: environmental problems (unreadable files, wrong key material,
corrupt content, write errors) degrade to an empty document or a logged no-op and are
reported through [`LoadOutcome`] and [`SaveOutcome`]. Undecryptable content and unreadable
save files are preserved verbatim in a numbered backup file before they are discarded.
*/

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cipher::{AesCipher, Cipher};
use crate::config::SaveConfig;
use crate::keys::KeyMaterial;
use crate::serializer::{Document, DocumentSerializer};
use crate::storage::SaveStorage;
use crate::{Result, SaveError};

/// Where a document's canonical text lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentSource {
    /// A save-file name; the storage adapter assigns its default extension if missing
    File(String),
    /// The document's initial text, never persisted externally
    Literal(String),
}

impl ContentSource {
    pub fn file<S: Into<String>>(name: S) -> Self {
        ContentSource::File(name.into())
    }

    pub fn literal<S: Into<String>>(text: S) -> Self {
        ContentSource::Literal(text.into())
    }

    /// The file name or literal text
    pub fn as_str(&self) -> &str {
        match self {
            ContentSource::File(name) => name,
            ContentSource::Literal(text) => text,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, ContentSource::Literal(_))
    }
}

/// Notifications published to subscribers of a [`SaveData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveEvent {
    /// The document was modified by a write or a single-key clear
    Modified,
    /// Every entry was removed
    ClearedAll,
    /// The backing save file was deleted
    FileDeleted,
}

/// How the document was obtained at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The source held no content
    Empty,
    /// The source held a plaintext JSON object
    Plaintext,
    /// The source held ciphertext that decrypted to a JSON object
    Decrypted,
    /// The source could not be read; the document starts empty
    ReadFailed {
        reason: String,
        /// Name of the backup file holding a copy of the unreadable file, if one was written
        backup: Option<String>,
    },
    /// The source held ciphertext that could not be decrypted with the current key material
    DecryptFailed {
        reason: String,
        /// Name of the backup file holding the original content, if one was written
        backup: Option<String>,
    },
    /// The source held plaintext that is not a JSON object
    ParseFailed { reason: String },
}

/// Result of a save attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing changed since the last save point; no I/O was performed
    Unchanged,
    /// The new content was persisted (or, for literal sources, cached)
    Written,
    /// The platform cannot write files; the content was cached but not persisted
    Skipped,
    /// Serialization, encryption or the write itself failed
    Failed(String),
}

/// Collaborators and policy flags for a [`SaveData`] instance
pub struct SaveSettings<S, C = AesCipher> {
    pub storage: S,
    pub cipher: C,
    pub keys: Arc<KeyMaterial>,
    pub serializer: Arc<DocumentSerializer>,
    /// Encrypt non-empty documents on save
    pub use_security: bool,
    /// Write a backup file when stored content cannot be read or decrypted
    pub retain_backup_file: bool,
    /// Whether the platform can write files at all
    pub can_write_files: bool,
    /// Save immediately after every modification
    pub save_on_modification: bool,
}

impl<S, C> SaveSettings<S, C> {
    /// Settings with default policy: no encryption, backups retained, files writable
    pub fn new(storage: S, cipher: C, keys: Arc<KeyMaterial>) -> Self {
        Self {
            storage,
            cipher,
            keys,
            serializer: Arc::new(DocumentSerializer::default()),
            use_security: false,
            retain_backup_file: true,
            can_write_files: true,
            save_on_modification: false,
        }
    }

    pub fn with_security(mut self, use_security: bool) -> Self {
        self.use_security = use_security;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<DocumentSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Take the backup, platform and autosave policy from `config`
    pub fn with_config(mut self, config: &SaveConfig) -> Self {
        self.retain_backup_file = config.retain_backup_file;
        self.can_write_files = config.can_write_files;
        self.save_on_modification = config.save_on_modification;
        self
    }
}

type Listener = Box<dyn FnMut(SaveEvent)>;

/// An in-memory document bound to one content source
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use keepsake_core::{AesCipher, ContentSource, KeyMaterial, MemoryStorage, SaveData, SaveSettings};
///
/// let settings = SaveSettings::new(
///     MemoryStorage::new(),
///     AesCipher::new(),
///     Arc::new(KeyMaterial::generate(16)),
/// );
/// let mut data = SaveData::new(ContentSource::literal(r#"{"Highscore": 1}"#), settings);
///
/// assert_eq!(data.read("Highscore", 0), 1);
/// data.write("Highscore", &2)?;
/// assert!(data.save().contains("\"Highscore\": 2"));
/// # Ok::<(), keepsake_core::SaveError>(())
/// ```
pub struct SaveData<S: SaveStorage, C: Cipher = AesCipher> {
    source: ContentSource,
    settings: SaveSettings<S, C>,
    document: Document,
    /// Raw text last read from or written to the source
    save_point: String,
    clean: bool,
    load_outcome: LoadOutcome,
    listeners: Vec<Listener>,
}

impl<S: SaveStorage, C: Cipher> SaveData<S, C> {
    /// Bind a new instance to `source` and load its document
    pub fn new(source: ContentSource, settings: SaveSettings<S, C>) -> Self {
        let mut data = Self {
            source,
            settings,
            document: Document::new(),
            save_point: String::new(),
            clean: false,
            load_outcome: LoadOutcome::Empty,
            listeners: Vec::new(),
        };
        data.load_outcome = data.load_from_source();
        data
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn is_literal(&self) -> bool {
        self.source.is_literal()
    }

    /// Whether the document matches the last save point
    pub fn is_clean(&self) -> bool {
        self.clean
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    /// Read-only view of the document
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn settings(&self) -> &SaveSettings<S, C> {
        &self.settings
    }

    /// Full path of the save file, `None` for literal sources or non-file storage
    pub fn save_file_path(&self) -> Option<PathBuf> {
        match &self.source {
            ContentSource::File(name) => self.settings.storage.location(name),
            ContentSource::Literal(_) => None,
        }
    }

    /// Register a listener for [`SaveEvent`]s
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(SaveEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn exists(&self, key: &str) -> bool {
        self.document.contains_key(key)
    }

    pub fn item_count(&self) -> usize {
        self.document.len()
    }

    /// All keys currently in the document
    pub fn keys(&self) -> Vec<String> {
        self.document.keys().cloned().collect()
    }

    /// Read the value at `key`, or `default` if it is missing or not a `T`
    pub fn read<T: DeserializeOwned + 'static>(&self, key: &str, default: T) -> T {
        if !self.exists(key) {
            debug!(key, "key not found, returning default");
            return default;
        }
        match self.settings.serializer.deserialize_key(key, &self.document) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "value has an unexpected type, returning default");
                default
            }
        }
    }

    /// Read the value at `key`
    ///
    /// Returns `Ok(None)` for a missing key and a [`SaveError::Deserialization`] if the
    /// stored value is not a `T`.
    pub fn try_read<T: DeserializeOwned + 'static>(&self, key: &str) -> Result<Option<T>> {
        if !self.exists(key) {
            return Ok(None);
        }
        self.settings
            .serializer
            .deserialize_key(key, &self.document)
            .map(Some)
    }

    /// Read an opaque value through its registered converter, or `default`
    pub fn read_with_converter<T: 'static>(&self, key: &str, default: T) -> T {
        if !self.exists(key) {
            return default;
        }
        match self
            .settings
            .serializer
            .deserialize_key_with_converter(key, &self.document)
        {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "converter failed, returning default");
                default
            }
        }
    }

    /// Read an opaque value through its registered converter
    pub fn try_read_with_converter<T: 'static>(&self, key: &str) -> Result<Option<T>> {
        if !self.exists(key) {
            return Ok(None);
        }
        self.settings
            .serializer
            .deserialize_key_with_converter(key, &self.document)
            .map(Some)
    }

    /// Insert or overwrite the value at `key`
    ///
    /// Fails for an empty key, for a value that serializes to `null`, and for values
    /// the serializer cannot represent. Returns `self` so writes can be chained.
    pub fn write<T: Serialize + 'static>(&mut self, key: &str, value: &T) -> Result<&mut Self> {
        check_key(key)?;
        let entry = self.settings.serializer.serialize_key(key, value)?;
        self.insert(key, entry)
    }

    /// Insert or overwrite an opaque value through its registered converter
    pub fn write_with_converter<T: 'static>(&mut self, key: &str, value: &T) -> Result<&mut Self> {
        check_key(key)?;
        let entry = self
            .settings
            .serializer
            .serialize_key_with_converter(key, value)?;
        self.insert(key, entry)
    }

    /// Remove `key`; returns whether anything was removed
    pub fn clear(&mut self, key: &str) -> bool {
        if self.document.remove(key).is_none() {
            return false;
        }
        self.modified();
        true
    }

    /// Remove every entry; the change is not persisted until the next save
    pub fn clear_all(&mut self) {
        self.document.clear();
        self.clean = false;
        self.notify(SaveEvent::ClearedAll);
    }

    /// Delete the backing save file
    ///
    /// Only valid for file-backed instances. A delete that fails at the storage level is
    /// logged, not returned.
    pub fn delete_file(&mut self) -> Result<()> {
        let name = match &self.source {
            ContentSource::File(name) => name.clone(),
            ContentSource::Literal(text) => {
                return Err(SaveError::LiteralSource(format!(
                    "'{}'; initialize with a file name to delete a save file",
                    preview(text)
                )))
            }
        };

        match self.settings.storage.delete(&name) {
            Ok(true) => self.notify(SaveEvent::FileDeleted),
            Ok(false) => warn!(
                file = %self.settings.storage.file_name(&name),
                "Failed to delete save file: not found"
            ),
            Err(e) => warn!(
                file = %self.settings.storage.file_name(&name),
                error = %e,
                "Failed to delete save file"
            ),
        }
        Ok(())
    }

    /// Persist the document and describe the result as text
    ///
    /// Literal sources return the current serialized content. File sources return
    /// `"Content saved to: <file>"` after a write and an empty string when nothing was
    /// written or saving failed; [`SaveData::commit`] distinguishes the cases.
    pub fn save(&mut self) -> String {
        let outcome = self.commit();
        match (&self.source, outcome) {
            (ContentSource::Literal(_), SaveOutcome::Failed(_)) => String::new(),
            (ContentSource::Literal(_), _) => self.save_point.clone(),
            (ContentSource::File(name), SaveOutcome::Written | SaveOutcome::Skipped) => {
                format!("Content saved to: {}", self.settings.storage.file_name(name))
            }
            (ContentSource::File(_), _) => String::new(),
        }
    }

    /// Persist the document if it changed since the last save point
    pub fn commit(&mut self) -> SaveOutcome {
        if self.clean {
            return SaveOutcome::Unchanged;
        }

        let rendered = match self.render() {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(source = %self.describe(), error = %e, "Exception while attempting to save");
                return SaveOutcome::Failed(e.to_string());
            }
        };

        if rendered == self.save_point {
            self.clean = true;
            return SaveOutcome::Unchanged;
        }

        let outcome = match &self.source {
            ContentSource::Literal(_) => SaveOutcome::Written,
            ContentSource::File(_) if !self.settings.can_write_files => {
                warn!(
                    source = %self.describe(),
                    "This platform does not support writing save files; content kept in memory"
                );
                SaveOutcome::Skipped
            }
            ContentSource::File(name) => match self.settings.storage.save(name, &rendered) {
                Ok(()) => SaveOutcome::Written,
                Err(e) => {
                    error!(source = %self.describe(), error = %e, "Exception while attempting to save");
                    return SaveOutcome::Failed(e.to_string());
                }
            },
        };

        self.save_point = rendered;
        self.clean = true;
        outcome
    }

    /// Serialize the document, encrypting it when security is enabled and it has entries
    fn render(&self) -> Result<String> {
        let json = self.settings.serializer.serialize(&self.document)?;
        if self.settings.use_security && !self.document.is_empty() {
            return self.settings.cipher.encrypt(&json, &self.settings.keys);
        }
        Ok(json)
    }

    fn insert(&mut self, key: &str, entry: Value) -> Result<&mut Self> {
        if entry.is_null() {
            return Err(SaveError::invalid_argument(format!(
                "value for '{key}' cannot be null"
            )));
        }
        self.document.insert(key.to_string(), entry);
        self.modified();
        Ok(self)
    }

    fn modified(&mut self) {
        self.clean = false;
        self.notify(SaveEvent::Modified);
        if self.settings.save_on_modification {
            self.commit();
        }
    }

    fn notify(&mut self, event: SaveEvent) {
        for listener in self.listeners.iter_mut() {
            listener(event);
        }
    }

    fn load_from_source(&mut self) -> LoadOutcome {
        let raw = match &self.source {
            ContentSource::Literal(text) => text.clone(),
            ContentSource::File(name) => match self.settings.storage.load(name) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(source = %self.describe(), error = %e, "Unable to read save file, starting empty");
                    // Keep unreadable bytes around before the next save replaces them
                    let backup = if self.settings.storage.exists(name) {
                        self.quarantine(|storage, candidate| storage.copy(name, candidate))
                    } else {
                        None
                    };
                    return LoadOutcome::ReadFailed {
                        reason: e.to_string(),
                        backup,
                    };
                }
            },
        };

        if raw.trim().is_empty() {
            self.save_point = raw;
            return LoadOutcome::Empty;
        }

        if is_plaintext(&raw) {
            self.save_point = raw;
            return match self.settings.serializer.parse(&self.save_point) {
                Ok(document) => {
                    self.document = document;
                    LoadOutcome::Plaintext
                }
                Err(e) => {
                    warn!(source = %self.describe(), error = %e, "Unable to parse content, starting empty");
                    LoadOutcome::ParseFailed {
                        reason: e.to_string(),
                    }
                }
            };
        }

        match self.decrypt_document(&raw) {
            Ok(document) => {
                self.document = document;
                self.save_point = raw;
                LoadOutcome::Decrypted
            }
            Err(e) => {
                warn!(
                    source = %self.describe(),
                    error = %e,
                    "Unable to decrypt content; it will be reset to an empty document"
                );
                let backup =
                    self.quarantine(|storage, candidate| storage.create(candidate, &raw));
                LoadOutcome::DecryptFailed {
                    reason: e.to_string(),
                    backup,
                }
            }
        }
    }

    fn decrypt_document(&self, raw: &str) -> Result<Document> {
        let plain = self.settings.cipher.decrypt(raw, &self.settings.keys)?;
        self.settings.serializer.parse(&plain).map_err(|e| {
            SaveError::decryption(format!("decrypted content is not a JSON object: {e}"))
        })
    }

    /// Preserve unusable content in the first free `<stem>-backup<N><ext>` file
    ///
    /// `store` writes the backup under the candidate name and returns `false` if the
    /// name is already taken.
    fn quarantine<F>(&self, store: F) -> Option<String>
    where
        F: Fn(&S, &str) -> Result<bool>,
    {
        let ContentSource::File(name) = &self.source else {
            return None;
        };
        if !self.settings.retain_backup_file {
            return None;
        }
        if !self.settings.can_write_files {
            warn!(source = %self.describe(), "Cannot write a backup file on this platform");
            return None;
        }

        let file_name = self.settings.storage.file_name(name);
        for index in 0.. {
            let candidate = backup_file_name(&file_name, index);
            if self.settings.storage.exists(&candidate) {
                continue;
            }
            match store(&self.settings.storage, &candidate) {
                Ok(true) => {
                    info!(backup = %candidate, "Original content was saved to a backup file");
                    return Some(candidate);
                }
                Ok(false) => continue,
                Err(e) => {
                    error!(backup = %candidate, error = %e, "Failed to write backup file");
                    return None;
                }
            }
        }
        None
    }

    fn describe(&self) -> String {
        match &self.source {
            ContentSource::File(name) => self.settings.storage.file_name(name),
            ContentSource::Literal(text) => format!("literal '{}'", preview(text)),
        }
    }
}

impl<S: SaveStorage, C: Cipher> fmt::Debug for SaveData<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveData")
            .field("source", &self.describe())
            .field("items", &self.document.len())
            .field("clean", &self.clean)
            .field("load_outcome", &self.load_outcome)
            .finish()
    }
}

/// Plaintext documents are JSON objects; anything else is treated as ciphertext
pub fn is_plaintext(raw: &str) -> bool {
    raw.trim_start().starts_with('{')
}

/// Name of the `index`-th backup file for `file_name`: `Data.json` → `Data-backup0.json`
pub fn backup_file_name(file_name: &str, index: usize) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let backup = match path.extension() {
        Some(ext) => format!("{stem}-backup{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}-backup{index}"),
    };
    path.with_file_name(backup).to_string_lossy().to_string()
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SaveError::invalid_argument("key cannot be empty"));
    }
    Ok(())
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(16).collect();
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        head
    }
}
