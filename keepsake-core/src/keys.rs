/*!
Key material generation, persistence and backup.

A [`KeyMaterial`] is the symmetric key and IV handed to the [`Cipher`] port, both kept
Base64-encoded. The [`KeyProvider`] owns the active material for a scope: it generates
missing values lazily from the OS random source, persists them in a small JSON
preferences file, and can export/import them through a self-validating backup file.
*/

use std::fmt;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::{Cipher, BLOCK_SIZE};
use crate::config::{SaveConfig, DEFAULT_KEY_SIZE};
use crate::{Result, SaveError};

/// Known plaintext encrypted into every key backup
pub const BACKUP_TEST_PLAINTEXT: &str = "Test123";

/// Symmetric key and initialization vector, Base64-encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: String,
    iv: String,
}

impl KeyMaterial {
    /// Wrap already-encoded key material without validating it
    pub fn new<K: Into<String>, I: Into<String>>(key: K, iv: I) -> Self {
        Self {
            key: key.into(),
            iv: iv.into(),
        }
    }

    /// Generate fresh random material with a `key_size`-byte key and a one-block IV
    pub fn generate(key_size: usize) -> Self {
        Self {
            key: random_base64(key_size),
            iv: random_base64(BLOCK_SIZE),
        }
    }

    /// The Base64-encoded key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The Base64-encoded IV
    pub fn iv(&self) -> &str {
        &self.iv
    }

    /// Decoded key bytes
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.key)
            .map_err(|e| SaveError::key_material(format!("key is not valid Base64: {e}")))
    }

    /// Decoded IV bytes
    pub fn iv_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.iv)
            .map_err(|e| SaveError::key_material(format!("IV is not valid Base64: {e}")))
    }

    /// Check that both values decode and have lengths the AES cipher accepts
    pub fn validate(&self) -> Result<()> {
        let key_len = self.key_bytes()?.len();
        if !matches!(key_len, 16 | 24 | 32) {
            return Err(SaveError::key_material(format!(
                "key must be 16, 24 or 32 bytes, got {key_len}"
            )));
        }
        let iv_len = self.iv_bytes()?.len();
        if iv_len != BLOCK_SIZE {
            return Err(SaveError::key_material(format!(
                "IV must be {BLOCK_SIZE} bytes, got {iv_len}"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// Exported key material plus a known-plaintext check value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBackup {
    pub key: String,
    pub iv: String,
    pub test_cipher_text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Stored preferences: the active key and IV, each possibly not generated yet
#[derive(Default, Serialize, Deserialize)]
struct KeyRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(rename = "_iv", default, skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
}

/// Owner of the active key material for a scope
///
/// # Example
/// ```rust
/// use keepsake_core::KeyProvider;
///
/// let mut provider = KeyProvider::in_memory(16);
/// let first = provider.get_or_create()?;
/// assert_eq!(provider.get_or_create()?, first);
/// # Ok::<(), keepsake_core::SaveError>(())
/// ```
pub struct KeyProvider {
    /// Preferences file; `None` keeps the material in memory only
    path: Option<PathBuf>,
    key_size: usize,
    record: KeyRecord,
}

impl KeyProvider {
    /// Create a provider that never touches the filesystem
    pub fn in_memory(key_size: usize) -> Self {
        Self {
            path: None,
            key_size,
            record: KeyRecord::default(),
        }
    }

    /// Open a provider backed by the preferences file at `path`
    ///
    /// The file is read if it exists; it is written on the first change.
    pub fn open<P: AsRef<Path>>(path: P, key_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let record = if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                KeyRecord::default()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            KeyRecord::default()
        };

        Ok(Self {
            path: Some(path),
            key_size,
            record,
        })
    }

    /// Open a provider using the key size from `config`
    pub fn from_config<P: AsRef<Path>>(config: &SaveConfig, path: Option<P>) -> Result<Self> {
        config.validate()?;
        match path {
            Some(path) => Self::open(path, config.key_size),
            None => Ok(Self::in_memory(config.key_size)),
        }
    }

    /// Current material, without generating anything
    pub fn current(&self) -> Option<KeyMaterial> {
        match (&self.record.key, &self.record.iv) {
            (Some(key), Some(iv)) => Some(KeyMaterial::new(key.clone(), iv.clone())),
            _ => None,
        }
    }

    /// Return the active material, generating and persisting whatever is missing
    pub fn get_or_create(&mut self) -> Result<KeyMaterial> {
        let mut changed = false;
        if self.record.key.is_none() {
            self.record.key = Some(random_base64(self.key_size));
            changed = true;
        }
        if self.record.iv.is_none() {
            self.record.iv = Some(random_base64(BLOCK_SIZE));
            changed = true;
        }
        if changed {
            self.persist()?;
        }

        self.current()
            .ok_or_else(|| SaveError::key_material("key material missing after generation"))
    }

    /// Replace the key with fresh random bytes
    ///
    /// Content encrypted with the previous key can no longer be decrypted.
    pub fn regenerate_key(&mut self) -> Result<KeyMaterial> {
        warn!("Regenerating encryption key; previously encrypted save files become unreadable");
        self.record.key = Some(random_base64(self.key_size));
        self.persist()?;
        self.get_or_create()
    }

    /// Replace the IV with fresh random bytes
    ///
    /// Content encrypted with the previous IV can no longer be decrypted.
    pub fn regenerate_iv(&mut self) -> Result<KeyMaterial> {
        warn!("Regenerating encryption IV; previously encrypted save files become unreadable");
        self.record.iv = Some(random_base64(BLOCK_SIZE));
        self.persist()?;
        self.get_or_create()
    }

    /// Install externally supplied material after validating it
    pub fn set(&mut self, material: &KeyMaterial) -> Result<()> {
        material.validate()?;
        self.record.key = Some(material.key().to_string());
        self.record.iv = Some(material.iv().to_string());
        self.persist()
    }

    /// Forget the stored material
    pub fn clear(&mut self) -> Result<()> {
        if let Some(key) = self.record.key.as_mut() {
            key.zeroize();
        }
        if let Some(iv) = self.record.iv.as_mut() {
            iv.zeroize();
        }
        self.record = KeyRecord::default();
        self.persist()
    }

    /// Export the active material to `path`, with a check value for later validation
    pub fn backup<P: AsRef<Path>, C: Cipher>(&mut self, path: P, cipher: &C) -> Result<KeyBackup> {
        let material = self.get_or_create()?;
        let backup = KeyBackup {
            key: material.key().to_string(),
            iv: material.iv().to_string(),
            test_cipher_text: cipher.encrypt(BACKUP_TEST_PLAINTEXT, &material)?,
            created_at: Some(Utc::now()),
        };

        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&backup)?)?;
        info!(path = %path.as_ref().display(), "Key backup saved");
        Ok(backup)
    }

    /// Import material from a backup file, committing it only if it decrypts the check value
    pub fn restore<P: AsRef<Path>, C: Cipher>(&mut self, path: P, cipher: &C) -> Result<KeyMaterial> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let backup: KeyBackup = serde_json::from_str(&raw)?;

        if backup.test_cipher_text.is_empty() {
            return Err(SaveError::BackupValidation(
                "backup has no test ciphertext".to_string(),
            ));
        }

        let candidate = KeyMaterial::new(backup.key, backup.iv);
        candidate
            .validate()
            .map_err(|e| SaveError::BackupValidation(e.to_string()))?;

        match cipher.decrypt(&backup.test_cipher_text, &candidate) {
            Ok(plain) if plain == BACKUP_TEST_PLAINTEXT => {}
            Ok(_) => {
                return Err(SaveError::BackupValidation(
                    "test ciphertext does not match the known plaintext".to_string(),
                ))
            }
            Err(e) => return Err(SaveError::BackupValidation(e.to_string())),
        }

        self.set(&candidate)?;
        info!(path = %path.as_ref().display(), "Key backup restored");
        Ok(candidate)
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.record)?)?;
        Ok(())
    }
}

impl Default for KeyProvider {
    fn default() -> Self {
        Self::in_memory(DEFAULT_KEY_SIZE)
    }
}

impl fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProvider")
            .field("path", &self.path)
            .field("key_size", &self.key_size)
            .field("has_key", &self.record.key.is_some())
            .field("has_iv", &self.record.iv.is_some())
            .finish()
    }
}

fn random_base64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    let encoded = STANDARD.encode(&bytes);
    bytes.zeroize();
    encoded
}
