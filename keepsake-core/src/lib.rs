/*!
# Keepsake Core Engine

Key-value save-data persistence with optional AES encryption.

This crate stores structured application state as a JSON document on disk (or in an
in-memory string), optionally encrypted, with:

- Typed reads and writes by key, backed by serde and pluggable value converters
- Transparent decrypt-on-load and encrypt-on-save
- Quarantine of undecryptable content into numbered backup files
- Change tracking that skips redundant writes
- A registry guaranteeing one live document per content source

## Architecture

The core follows hexagonal architecture principles:
- [`SaveData`] holds the document logic and never fails on load or save
- Storage and encryption are ports ([`SaveStorage`], [`Cipher`]) with local-file,
  in-memory and AES-CBC adapters
- Key material is owned by a [`KeyProvider`] and shared by reference

## Usage

```rust
use keepsake_core::{ContentSource, KeyMaterial, SaveConfig, SaveRegistry};

# let dir = std::env::temp_dir().join("keepsake-doc-lib");
let config = SaveConfig::with_save_dir(&dir);
let mut registry = SaveRegistry::from_config(config, KeyMaterial::generate(16))?;

let profile = registry.get_or_create(ContentSource::file("Profile"), true);
profile.write("Highscore", &42)?;
profile.save();

// Persist everything that changed, e.g. on shutdown
registry.save_all();
# Ok::<(), keepsake_core::SaveError>(())
```
*/

pub mod cipher;
pub mod config;
pub mod error;
pub mod keys;
pub mod observability;
pub mod registry;
pub mod save_data;
pub mod serializer;
pub mod storage;


pub use cipher::{AesCipher, Cipher};
pub use config::{FileExtension, Formatting, SaveConfig};
pub use error::{Result, SaveError};
pub use keys::{KeyBackup, KeyMaterial, KeyProvider};
pub use registry::SaveRegistry;
pub use save_data::{ContentSource, LoadOutcome, SaveData, SaveEvent, SaveOutcome, SaveSettings};
pub use serializer::{Document, DocumentSerializer, ValueConverter};
#[cfg(feature = "local")]
pub use storage::LocalFileStorage;
pub use storage::{MemoryStorage, SaveStorage};
