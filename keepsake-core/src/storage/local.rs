/*!
Local filesystem storage adapter implementation.
*/

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::SaveStorage;
use crate::config::{assign_extension, FileExtension, SaveConfig};
use crate::{Result, SaveError};

/// Extension of the sidecar metadata file removed together with a save file
const SIDECAR_EXTENSION: &str = ".meta";

/// Local filesystem storage adapter
///
/// This implementation stores save files in a single directory on the local filesystem.
/// The directory is created on first write.
///
/// # Example
/// ```rust
/// use keepsake_core::storage::{LocalFileStorage, SaveStorage};
///
/// # let dir = std::env::temp_dir().join("keepsake-doc-local");
/// let storage = LocalFileStorage::new(&dir);
/// storage.save("Profile", "{\"Highscore\":42}")?;
/// assert!(storage.exists("Profile.json"));
/// # Ok::<(), keepsake_core::SaveError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    /// Directory holding all save files
    base_dir: PathBuf,
    /// Extension assigned to names without one
    extension: FileExtension,
    /// Create missing save files on load; off on platforms that cannot write files
    create_missing: bool,
}

impl LocalFileStorage {
    /// Create a new local file storage adapter rooted at `base_dir`
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            extension: FileExtension::default(),
            create_missing: true,
        }
    }

    /// Create a local file storage adapter from the save directory, extension and
    /// platform capability in `config`
    pub fn from_config(config: &SaveConfig) -> Self {
        Self {
            base_dir: config.save_dir.clone(),
            extension: config.extension,
            create_missing: config.can_write_files,
        }
    }

    /// Whether `load` creates a missing save file
    pub fn with_create_missing(mut self, create_missing: bool) -> Self {
        self.create_missing = create_missing;
        self
    }

    /// Use `extension` for names that do not carry one
    pub fn with_extension(mut self, extension: FileExtension) -> Self {
        self.extension = extension;
        self
    }

    /// The directory holding the save files
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// List the save files in the save directory, skipping sidecar metadata files
    pub fn list(&self, include_extension: bool) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let file_name = path.file_name().unwrap_or_default().to_string_lossy();
            if file_name.to_lowercase().ends_with(SIDECAR_EXTENSION) {
                continue;
            }
            let name = if include_extension {
                file_name.to_string()
            } else {
                path.file_stem()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string()
            };
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Resolve the full path for a given save-file name
    fn resolve_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(self.file_name(name))
    }

    /// Ensure the save directory exists, creating it if necessary
    fn ensure_base_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).map_err(|e| {
                SaveError::storage(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_base_dir()?;
        fs::write(path, content).map_err(|e| {
            SaveError::storage(format!("Failed to write save file {}: {}", path.display(), e))
        })
    }
}

impl SaveStorage for LocalFileStorage {
    fn file_name(&self, name: &str) -> String {
        assign_extension(name, self.extension)
    }

    fn location(&self, name: &str) -> Option<PathBuf> {
        Some(self.resolve_path(name))
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve_path(name).is_file()
    }

    fn load(&self, name: &str) -> Result<String> {
        let full_path = self.resolve_path(name);

        if !full_path.exists() {
            if !self.create_missing {
                debug!(path = %full_path.display(), "save file missing, not created on a read-only platform");
                return Ok(String::new());
            }
            self.write(&full_path, "")?;
            warn!(
                "No existing {} was found, a new one was initialized",
                self.file_name(name)
            );
            return Ok(String::new());
        }

        fs::read_to_string(&full_path).map_err(|e| {
            SaveError::storage(format!(
                "Failed to read save file {}: {}",
                full_path.display(),
                e
            ))
        })
    }

    fn save(&self, name: &str, content: &str) -> Result<()> {
        let full_path = self.resolve_path(name);
        self.write(&full_path, content)?;
        debug!(path = %full_path.display(), bytes = content.len(), "save file written");
        Ok(())
    }

    fn create(&self, name: &str, content: &str) -> Result<bool> {
        let full_path = self.resolve_path(name);
        if full_path.exists() {
            return Ok(false);
        }
        self.write(&full_path, content)?;
        Ok(true)
    }

    fn copy(&self, from: &str, to: &str) -> Result<bool> {
        let (from_path, to_path) = (self.resolve_path(from), self.resolve_path(to));
        if to_path.exists() {
            return Ok(false);
        }
        self.ensure_base_dir()?;
        fs::copy(&from_path, &to_path).map_err(|e| {
            SaveError::storage(format!(
                "Failed to copy {} to {}: {}",
                from_path.display(),
                to_path.display(),
                e
            ))
        })?;
        Ok(true)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let full_path = self.resolve_path(name);
        if !full_path.is_file() {
            return Ok(false);
        }

        fs::remove_file(&full_path).map_err(|e| {
            SaveError::storage(format!(
                "Failed to delete save file {}: {}",
                full_path.display(),
                e
            ))
        })?;

        let mut sidecar = full_path.into_os_string();
        sidecar.push(SIDECAR_EXTENSION);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.is_file() {
            fs::remove_file(&sidecar)?;
        }

        Ok(true)
    }
}
