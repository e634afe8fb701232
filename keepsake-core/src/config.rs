//! Configuration module for save-file location, formatting and security policy
//!
//! This module provides the configuration structure shared by the storage
//! adapters, the serializer, the key provider and the instance registry.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, SaveError};

/// Default save-file name, without extension
pub const DEFAULT_FILE_NAME: &str = "Data";

/// Default directory for save files, relative to the working directory
pub const DEFAULT_SAVE_DIR: &str = "keepsake/saves";

/// Default key length in bytes (AES-128)
pub const DEFAULT_KEY_SIZE: usize = 16;

/// Extension assigned to save-file names that do not carry one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileExtension {
    #[default]
    Json,
    Xml,
    Txt,
}

impl FileExtension {
    /// The extension including its leading dot
    pub fn as_str(&self) -> &'static str {
        match self {
            FileExtension::Json => ".json",
            FileExtension::Xml => ".xml",
            FileExtension::Txt => ".txt",
        }
    }
}

/// Text layout used when serializing a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Formatting {
    /// Single line, no insignificant whitespace
    Compact,
    /// Pretty-printed with two-space indentation
    #[default]
    Indented,
}

/// Configuration for save files and the save-data core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Directory holding the save files
    pub save_dir: PathBuf,
    /// Default save-file name (without extension)
    pub file_name: String,
    /// Extension assigned to names without one
    pub extension: FileExtension,
    /// Serializer output layout
    pub formatting: Formatting,
    /// Keep undecryptable content in a backup file instead of discarding it
    pub retain_backup_file: bool,
    /// Whether the platform can write files at all
    pub can_write_files: bool,
    /// Save immediately after every write (applied by the registry)
    pub save_on_modification: bool,
    /// Key length in bytes: 16, 24 or 32
    pub key_size: usize,
}

impl SaveConfig {
    /// Create a configuration rooted at `save_dir` with all other settings at their defaults
    pub fn with_save_dir<P: AsRef<Path>>(save_dir: P) -> Self {
        SaveConfig {
            save_dir: save_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// The default save-file name with its extension
    pub fn full_file_name(&self) -> String {
        assign_extension(&self.file_name, self.extension)
    }

    /// Full path of the default save file
    pub fn full_file_path(&self) -> PathBuf {
        self.save_dir.join(self.full_file_name())
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: SaveConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration to a JSON file
    pub fn store_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), raw)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.file_name.trim().is_empty() {
            return Err(SaveError::validation("save-file name must not be empty"));
        }
        if self.save_dir.as_os_str().is_empty() {
            return Err(SaveError::validation("save directory must not be empty"));
        }
        if !matches!(self.key_size, 16 | 24 | 32) {
            return Err(SaveError::validation(format!(
                "unsupported key size {}: expected 16, 24 or 32 bytes",
                self.key_size
            )));
        }
        Ok(())
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        SaveConfig {
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            file_name: DEFAULT_FILE_NAME.to_string(),
            extension: FileExtension::default(),
            formatting: Formatting::default(),
            retain_backup_file: true,
            can_write_files: true,
            save_on_modification: false,
            key_size: DEFAULT_KEY_SIZE,
        }
    }
}

/// Append `extension` to `name` unless the name already carries an extension
pub fn assign_extension(name: &str, extension: FileExtension) -> String {
    if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{name}{}", extension.as_str())
    }
}
