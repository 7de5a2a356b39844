//! Configuration management commands.
//!
//! Stores CLI configuration in `~/.agora/config.toml`. Recognized keys are
//! `api-url` and `token`; other keys are stored as given.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

pub const API_URL_KEY: &str = "api-url";
pub const TOKEN_KEY: &str = "token";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Configuration key (api-url, token)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show all configuration
    Show,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".agora").join("config.toml"))
}

/// Defaults when the file does not exist.
fn load_config_from(path: &Path) -> Result<CliConfig> {
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_config_to(path: &Path, cfg: &CliConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn load_config() -> Result<CliConfig> {
    load_config_from(&config_path()?)
}

/// A value from the config file, if the file is readable and the key set.
pub fn load_value(key: &str) -> Option<String> {
    load_config()
        .ok()
        .and_then(|cfg| cfg.values.get(key).cloned())
}

/// Tokens are never echoed back in full.
fn display_value(key: &str, value: &str) -> String {
    if key != TOKEN_KEY || value.chars().count() <= 8 {
        return value.to_string();
    }
    let prefix: String = value.chars().take(8).collect();
    format!("{}…", prefix)
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;

    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut cfg = load_config_from(&path)?;
            cfg.values.insert(key.clone(), value.clone());
            save_config_to(&path, &cfg)?;

            let shown = display_value(&key, &value);
            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, shown)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": shown }), format)?,
            }
        }

        ConfigCommands::Get { key } => {
            let cfg = load_config_from(&path)?;
            match cfg.values.get(&key) {
                Some(value) => match format {
                    OutputFormat::Table => println!("{}", value),
                    _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
                },
                None => anyhow::bail!("Key '{}' not found", key),
            }
        }

        ConfigCommands::Show => {
            let cfg = load_config_from(&path)?;

            if cfg.values.is_empty() {
                output::print_info("No configuration values set.");
                return Ok(());
            }

            let shown: BTreeMap<&str, String> = cfg
                .values
                .iter()
                .map(|(k, v)| (k.as_str(), display_value(k, v)))
                .collect();

            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    for (k, v) in &shown {
                        output::print_detail(k, v);
                    }
                }
                _ => output::print_item(&shown, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will reset all CLI configuration. Use --force to confirm.");
                return Ok(());
            }

            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }

            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}
