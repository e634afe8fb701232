/*!
Error types for the Keepsake core engine.

Only programmer-misuse failures are surfaced through [`SaveError`]. Environmental
and data-corruption failures on the load and save paths are absorbed by the
save-data core and reported through its outcome enums instead.
*/

use thiserror::Error;

/// Result type used throughout the Keepsake core.
pub type Result<T> = std::result::Result<T, SaveError>;

/// Errors that can occur during save-data operations.
#[derive(Error, Debug)]
pub enum SaveError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Empty key, IV, key name or payload handed to an operation that requires one
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Decryption failures (wrong key/IV, corrupt ciphertext, invalid Base64)
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// A value could not be converted into a document entry
    #[error("Serialization failed for '{key}': {reason}")]
    Serialization { key: String, reason: String },

    /// A document entry could not be converted into the requested type
    #[error("Deserialization failed for '{key}': {reason}")]
    Deserialization { key: String, reason: String },

    /// An opaque value was used without a converter registered for its type
    #[error("No converter registered for type '{0}'")]
    UnregisteredConverter(&'static str),

    /// A file-only operation was requested on a literal-backed instance
    #[error("Cannot perform file operation on a string-literal source: {0}")]
    LiteralSource(String),

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed or undecodable key material
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// A key backup failed its known-plaintext check
    #[error("Key backup validation failed: {0}")]
    BackupValidation(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl SaveError {
    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new decryption error
    pub fn decryption<S: Into<String>>(msg: S) -> Self {
        Self::Decryption(msg.into())
    }

    /// Create a new serialization error for `key`
    pub fn serialization<K: Into<String>, S: ToString>(key: K, reason: S) -> Self {
        Self::Serialization {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new deserialization error for `key`
    pub fn deserialization<K: Into<String>, S: ToString>(key: K, reason: S) -> Self {
        Self::Deserialization {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new key material error
    pub fn key_material<S: Into<String>>(msg: S) -> Self {
        Self::KeyMaterial(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
}
