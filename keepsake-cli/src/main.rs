/*!
Keepsake CLI - Command-line interface for Keepsake save files.

This CLI lists, inspects, encrypts, decrypts and deletes save files in a save directory,
and manages the key material used to encrypt them.
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use keepsake_core::config::DEFAULT_SAVE_DIR;
use keepsake_core::save_data::is_plaintext;
use keepsake_core::{
    AesCipher, ContentSource, KeyMaterial, KeyProvider, LoadOutcome, LocalFileStorage, SaveConfig,
    SaveData, SaveOutcome, SaveSettings, SaveStorage,
};
use tabled::{Table, Tabled};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(about = "CLI for Keepsake save files")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the save files
    #[arg(short, long, global = true, env = "KEEPSAKE_SAVE_DIR", default_value = DEFAULT_SAVE_DIR)]
    dir: PathBuf,

    /// Preferences file holding the key material
    #[arg(short, long, global = true, env = "KEEPSAKE_KEYS", default_value = "keepsake/keys.json")]
    keys: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all save files
    List,
    /// Show the entries of a save file
    Show {
        /// Save-file name
        name: String,
    },
    /// Rewrite a save file encrypted with the current key material
    Encrypt {
        /// Save-file name
        name: String,
    },
    /// Rewrite a save file as plaintext JSON
    Decrypt {
        /// Save-file name
        name: String,
    },
    /// Delete a save file
    Delete {
        /// Save-file name
        name: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Manage encryption key material
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Print the current key and IV, generating them if missing
    Show,
    /// Replace the key; existing encrypted saves become unreadable
    RegenerateKey,
    /// Replace the IV; existing encrypted saves become unreadable
    RegenerateIv,
    /// Export the key material to a backup file
    Backup {
        /// Backup file to write
        path: PathBuf,
    },
    /// Import key material from a backup file after validating it
    Restore {
        /// Backup file to read
        path: PathBuf,
    },
}

#[derive(Tabled)]
struct SaveFileInfo {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Encrypted")]
    encrypted: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

#[derive(Tabled)]
struct EntryInfo {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let config = SaveConfig::with_save_dir(&cli.dir);
    config.validate()?;

    match cli.command {
        Commands::List => list_save_files(&config)?,
        Commands::Show { name } => show_save_file(&config, &cli.keys, &name)?,
        Commands::Encrypt { name } => rewrite_save_file(&config, &cli.keys, &name, true)?,
        Commands::Decrypt { name } => rewrite_save_file(&config, &cli.keys, &name, false)?,
        Commands::Delete { name, force } => delete_save_file(&config, &name, force)?,
        Commands::Keys { action } => manage_keys(&config, &cli.keys, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn list_save_files(config: &SaveConfig) -> Result<(), anyhow::Error> {
    info!("Listing save files in {}", config.save_dir.display());

    let storage = LocalFileStorage::from_config(config);
    let mut files = Vec::new();

    for name in storage.list(true)? {
        let path = config.save_dir.join(&name);
        let (size, modified) = match std::fs::metadata(&path) {
            Ok(meta) => (
                format_size(meta.len()),
                meta.modified()
                    .map(format_time)
                    .unwrap_or_else(|_| "Unknown".to_string()),
            ),
            Err(e) => {
                warn!("Failed to read metadata for {}: {}", path.display(), e);
                ("Unknown".to_string(), "Unknown".to_string())
            }
        };

        let encrypted = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => "empty",
            Ok(raw) if is_plaintext(&raw) => "no",
            Ok(_) => "yes",
            Err(_) => "unknown",
        };

        files.push(SaveFileInfo {
            name,
            size,
            encrypted: encrypted.to_string(),
            modified,
        });
    }

    if files.is_empty() {
        println!("No save files found in {}", config.save_dir.display());
    } else {
        println!("{}", Table::new(files));
    }

    Ok(())
}

fn show_save_file(config: &SaveConfig, keys_path: &Path, name: &str) -> Result<(), anyhow::Error> {
    info!("Showing save file: {}", name);

    let keys = existing_keys(config, keys_path)?;
    let mut settings = settings(config, keys, false);
    // Inspecting must never leave backup files behind
    settings.retain_backup_file = false;
    let data = open_existing(config, name, settings)?;

    if data.item_count() == 0 {
        println!("{} has no entries", name);
        return Ok(());
    }

    let entries: Vec<EntryInfo> = data
        .document()
        .iter()
        .map(|(key, value)| EntryInfo {
            key: key.clone(),
            value: serde_json::to_string(value).unwrap_or_else(|_| "<unprintable>".to_string()),
        })
        .collect();
    println!("{}", Table::new(entries));

    Ok(())
}

fn rewrite_save_file(
    config: &SaveConfig,
    keys_path: &Path,
    name: &str,
    encrypt: bool,
) -> Result<(), anyhow::Error> {
    let mut provider = KeyProvider::from_config(config, Some(keys_path))?;
    let settings = settings(config, provider.get_or_create()?, encrypt);
    let mut data = open_existing(config, name, settings)?;

    match data.commit() {
        SaveOutcome::Written => {
            let state = if encrypt { "encrypted" } else { "plaintext" };
            println!("✓ {} rewritten as {}", name, state);
        }
        SaveOutcome::Unchanged => println!("{} is already in the requested form", name),
        SaveOutcome::Skipped => warn!("Writing save files is disabled"),
        SaveOutcome::Failed(reason) => {
            error!("✗ Failed to rewrite {}: {}", name, reason);
            return Err(anyhow::anyhow!("Failed to rewrite {name}: {reason}"));
        }
    }

    Ok(())
}

fn delete_save_file(config: &SaveConfig, name: &str, force: bool) -> Result<(), anyhow::Error> {
    let storage = LocalFileStorage::from_config(config);
    if !storage.exists(name) {
        return Err(anyhow::anyhow!(
            "Save file '{}' not found in {}",
            storage.file_name(name),
            config.save_dir.display()
        ));
    }

    if !force {
        print!("Are you sure you want to delete save file '{name}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    storage.delete(name)?;
    println!("✓ Save file deleted successfully");
    Ok(())
}

fn manage_keys(config: &SaveConfig, keys_path: &Path, action: KeyAction) -> Result<(), anyhow::Error> {
    let mut provider = KeyProvider::from_config(config, Some(keys_path))?;
    let cipher = AesCipher::new();

    match action {
        KeyAction::Show => print_material(&provider.get_or_create()?),
        KeyAction::RegenerateKey => {
            print_material(&provider.regenerate_key()?);
            println!("Previously encrypted save files can no longer be decrypted");
        }
        KeyAction::RegenerateIv => {
            print_material(&provider.regenerate_iv()?);
            println!("Previously encrypted save files can no longer be decrypted");
        }
        KeyAction::Backup { path } => {
            let backup = provider.backup(&path, &cipher)?;
            println!("✓ Key backup written to {}", path.display());
            if let Some(created_at) = backup.created_at {
                println!("  Created: {}", created_at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        KeyAction::Restore { path } => {
            provider.restore(&path, &cipher)?;
            println!("✓ Key backup restored from {}", path.display());
        }
    }

    Ok(())
}

/// Stored key material, without generating any
fn existing_keys(config: &SaveConfig, keys_path: &Path) -> Result<KeyMaterial, anyhow::Error> {
    let provider = KeyProvider::from_config(config, Some(keys_path))?;
    provider.current().ok_or_else(|| {
        anyhow::anyhow!(
            "No key material found in {}; run `keepsake keys show` to create it",
            keys_path.display()
        )
    })
}

fn settings(
    config: &SaveConfig,
    keys: KeyMaterial,
    use_security: bool,
) -> SaveSettings<LocalFileStorage> {
    SaveSettings::new(
        LocalFileStorage::from_config(config),
        AesCipher::new(),
        Arc::new(keys),
    )
    .with_security(use_security)
    .with_config(config)
}

/// Load an existing save file, refusing to create missing files or to work on unreadable ones
fn open_existing(
    config: &SaveConfig,
    name: &str,
    settings: SaveSettings<LocalFileStorage>,
) -> Result<SaveData<LocalFileStorage>, anyhow::Error> {
    if !settings.storage.exists(name) {
        return Err(anyhow::anyhow!(
            "Save file '{}' not found in {}",
            settings.storage.file_name(name),
            config.save_dir.display()
        ));
    }

    let data = SaveData::new(ContentSource::file(name), settings);
    let failure = match data.load_outcome() {
        LoadOutcome::DecryptFailed { reason, backup } => {
            if let Some(backup) = backup {
                println!("Original content preserved in {backup}");
            }
            Some(anyhow::anyhow!(
                "Cannot decrypt {name} with the current key material: {reason}"
            ))
        }
        LoadOutcome::ParseFailed { reason } => {
            Some(anyhow::anyhow!("{name} is not a valid save file: {reason}"))
        }
        LoadOutcome::ReadFailed { reason, backup } => {
            if let Some(backup) = backup {
                println!("Original content preserved in {backup}");
            }
            Some(anyhow::anyhow!("Cannot read {name}: {reason}"))
        }
        _ => None,
    };

    match failure {
        Some(e) => Err(e),
        None => Ok(data),
    }
}

fn print_material(material: &KeyMaterial) {
    println!("Key: {}", material.key());
    println!("IV:  {}", material.iv());
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_time(time: std::time::SystemTime) -> String {
    let local: chrono::DateTime<chrono::Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
