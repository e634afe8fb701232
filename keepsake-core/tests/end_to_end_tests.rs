/*!
End-to-end integration tests for Keepsake.
These tests exercise the save-data core, key provider and registry against real files.
*/

use std::fs;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use keepsake_core::{
    AesCipher, ContentSource, KeyMaterial, KeyProvider, LoadOutcome, LocalFileStorage,
    SaveConfig, SaveData, SaveError, SaveOutcome, SaveRegistry, SaveSettings,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Inventory {
    gold: u32,
    items: Vec<String>,
}

fn open(dir: &TempDir, name: &str, keys: &Arc<KeyMaterial>, secure: bool) -> SaveData<LocalFileStorage> {
    let settings = SaveSettings::new(
        LocalFileStorage::new(dir.path()),
        AesCipher::new(),
        keys.clone(),
    )
    .with_security(secure);
    SaveData::new(ContentSource::file(name), settings)
}

#[test]
fn test_fresh_file_is_created_empty() {
    let temp_dir = TempDir::new().unwrap();
    let keys = Arc::new(KeyMaterial::generate(16));

    let data = open(&temp_dir, "Data", &keys, false);
    assert_eq!(data.item_count(), 0);
    assert!(!data.exists("x"));
    assert_eq!(data.load_outcome(), &LoadOutcome::Empty);
    assert_eq!(
        data.save_file_path(),
        Some(temp_dir.path().join("Data.json"))
    );
    assert_eq!(fs::read_to_string(temp_dir.path().join("Data.json")).unwrap(), "");
}

#[test]
fn test_values_survive_a_new_instance() {
    let temp_dir = TempDir::new().unwrap();
    let keys = Arc::new(KeyMaterial::generate(16));
    let inventory = Inventory {
        gold: 120,
        items: vec!["sword".to_string(), "potion".to_string()],
    };

    let mut data = open(&temp_dir, "Data", &keys, false);
    data.write("Highscore", &42)
        .unwrap()
        .write("Inventory", &inventory)
        .unwrap();
    assert_eq!(data.save(), "Content saved to: Data.json");

    let reloaded = open(&temp_dir, "Data", &keys, false);
    assert_eq!(reloaded.read("Highscore", 0), 42);
    assert_eq!(reloaded.try_read::<Inventory>("Inventory").unwrap(), Some(inventory));
}

#[test]
fn test_encrypted_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let keys = Arc::new(KeyMaterial::generate(32));

    let mut data = open(&temp_dir, "Secure", &keys, true);
    data.write("a", &1).unwrap();
    data.save();

    let raw = fs::read_to_string(temp_dir.path().join("Secure.json")).unwrap();
    assert!(!raw.trim_start().starts_with('{'));

    let reloaded = open(&temp_dir, "Secure", &keys, true);
    assert_eq!(reloaded.load_outcome(), &LoadOutcome::Decrypted);
    assert_eq!(reloaded.read("a", 0), 1);
}

#[test]
fn test_literal_source_never_touches_disk() {
    let temp_dir = TempDir::new().unwrap();
    let keys = Arc::new(KeyMaterial::generate(16));
    let settings = SaveSettings::new(
        LocalFileStorage::new(temp_dir.path()),
        AesCipher::new(),
        keys,
    );

    let mut data = SaveData::new(ContentSource::literal("{\"Highscore\":1}"), settings);
    assert_eq!(data.read("Highscore", 0), 1);
    assert!(matches!(data.delete_file(), Err(SaveError::LiteralSource(_))));

    data.write("Highscore", &2).unwrap();
    assert!(data.save().contains("\"Highscore\": 2"));
    assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_corrupt_ciphertext_is_backed_up() {
    let temp_dir = TempDir::new().unwrap();
    let keys = Arc::new(KeyMaterial::generate(16));
    let path = temp_dir.path().join("Secure.json");

    let mut data = open(&temp_dir, "Secure", &keys, true);
    data.write("a", &1).unwrap().write("b", &"two").unwrap();
    data.save();

    let mut raw = STANDARD.decode(fs::read_to_string(&path).unwrap()).unwrap();
    raw.truncate(raw.len() - 5);
    let corrupted = STANDARD.encode(&raw);
    fs::write(&path, &corrupted).unwrap();

    let reloaded = open(&temp_dir, "Secure", &keys, true);
    assert_eq!(reloaded.item_count(), 0);
    assert!(matches!(
        reloaded.load_outcome(),
        LoadOutcome::DecryptFailed { backup: Some(name), .. } if name == "Secure-backup0.json"
    ));
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("Secure-backup0.json")).unwrap(),
        corrupted
    );

    // A second failed load never overwrites the first backup
    let _again = open(&temp_dir, "Secure", &keys, true);
    assert!(temp_dir.path().join("Secure-backup1.json").is_file());
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("Secure-backup0.json")).unwrap(),
        corrupted
    );
}

#[test]
fn test_unreadable_file_is_backed_up_before_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let keys = Arc::new(KeyMaterial::generate(16));
    let bytes = [0xff, 0xfe, 0x41, 0x42, 0x80, 0x81];
    fs::write(temp_dir.path().join("Data.json"), bytes).unwrap();

    let mut data = open(&temp_dir, "Data", &keys, false);
    assert!(matches!(
        data.load_outcome(),
        LoadOutcome::ReadFailed { backup: Some(name), .. } if name == "Data-backup0.json"
    ));

    data.write("a", &1).unwrap();
    assert_eq!(data.save(), "Content saved to: Data.json");

    assert_eq!(
        fs::read(temp_dir.path().join("Data-backup0.json")).unwrap(),
        bytes
    );
    let storage = LocalFileStorage::new(temp_dir.path());
    assert_eq!(
        storage.list(true).unwrap(),
        vec!["Data-backup0.json", "Data.json"]
    );
}

#[test]
fn test_read_only_platform_loads_fresh_source_as_empty() {
    let temp_dir = TempDir::new().unwrap();
    let config = SaveConfig {
        can_write_files: false,
        ..SaveConfig::with_save_dir(temp_dir.path())
    };
    let settings = SaveSettings::new(
        LocalFileStorage::from_config(&config),
        AesCipher::new(),
        Arc::new(KeyMaterial::generate(16)),
    )
    .with_config(&config);

    let mut data = SaveData::new(ContentSource::file("Fresh"), settings);
    assert_eq!(data.load_outcome(), &LoadOutcome::Empty);

    data.write("a", &1).unwrap();
    assert_eq!(data.commit(), SaveOutcome::Skipped);
    assert!(!temp_dir.path().join("Fresh.json").exists());
}

#[test]
fn test_delete_file_removes_save_and_sidecar() {
    let temp_dir = TempDir::new().unwrap();
    let keys = Arc::new(KeyMaterial::generate(16));

    let mut data = open(&temp_dir, "Doomed", &keys, false);
    data.write("a", &1).unwrap();
    data.save();
    fs::write(temp_dir.path().join("Doomed.json.meta"), "sidecar").unwrap();

    data.delete_file().unwrap();
    assert!(!temp_dir.path().join("Doomed.json").exists());
    assert!(!temp_dir.path().join("Doomed.json.meta").exists());
}

#[test]
fn test_key_backup_restores_access_to_encrypted_saves() {
    let temp_dir = TempDir::new().unwrap();
    let prefs = temp_dir.path().join("prefs.json");
    let backup = temp_dir.path().join("keys_backup.json");
    let cipher = AesCipher::new();

    let mut provider = KeyProvider::open(&prefs, 16).unwrap();
    let original = Arc::new(provider.get_or_create().unwrap());
    provider.backup(&backup, &cipher).unwrap();

    let mut data = open(&temp_dir, "Vault", &original, true);
    data.write("secret", &"hidden").unwrap();
    data.save();

    let rotated = Arc::new(provider.regenerate_key().unwrap());
    let mut settings = SaveSettings::new(
        LocalFileStorage::new(temp_dir.path()),
        AesCipher::new(),
        rotated,
    )
    .with_security(true);
    settings.retain_backup_file = false;
    let locked_out = SaveData::new(ContentSource::file("Vault"), settings);
    assert_eq!(locked_out.item_count(), 0);

    let restored = Arc::new(provider.restore(&backup, &cipher).unwrap());
    let unlocked = open(&temp_dir, "Vault", &restored, true);
    assert_eq!(unlocked.read("secret", String::new()), "hidden");

    let reopened = KeyProvider::open(&prefs, 16).unwrap();
    assert_eq!(reopened.current().as_ref(), Some(restored.as_ref()));
}

#[test]
fn test_registry_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let config = SaveConfig {
        formatting: keepsake_core::Formatting::Compact,
        ..SaveConfig::with_save_dir(temp_dir.path())
    };
    let keys = KeyMaterial::generate(16);
    let mut registry = SaveRegistry::from_config(config.clone(), keys.clone()).unwrap();

    registry
        .get_or_create(ContentSource::file("Profile"), true)
        .write("Level", &3)
        .unwrap();
    registry
        .get_or_create(ContentSource::file("Settings"), false)
        .write("Volume", &0.5)
        .unwrap();

    let report = registry.save_all();
    assert_eq!(report.len(), 2);
    assert!(report.iter().all(|(_, outcome)| *outcome == SaveOutcome::Written));
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("Settings.json")).unwrap(),
        r#"{"Volume":0.5}"#
    );

    let storage = LocalFileStorage::from_config(&config);
    assert_eq!(storage.list(false).unwrap(), vec!["Profile", "Settings"]);

    // A fresh registry with the same keys sees the same data
    let mut next = SaveRegistry::from_config(config, keys).unwrap();
    assert_eq!(
        next.get_or_create(ContentSource::file("Profile"), true).read("Level", 0),
        3
    );
}
