//! Config command implementation.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use webdrop_core::config::Config;
use webdrop_core::file::format_size;

use super::{ConfigAction, ConfigArgs};
use crate::ui::parse_size;

/// Keys accepted by `config get` and `config set`.
const KEYS: &[(&str, &str)] = &[
    ("general.display_name", "Display name shown to peers"),
    ("general.device_name", "Device class shown to peers"),
    ("transfer.chunk_size", "Chunk size for outgoing transfers (e.g., 64k, 1M)"),
    ("transfer.auto_accept", "Accept incoming offers without asking"),
    ("transfer.output_dir", "Directory for received files"),
];

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Get { key } => {
            let config = super::load_config();
            let value = get_value(&config, &key)?;
            println!("{}", value.unwrap_or_else(|| "(unset)".to_string()));
        }
        ConfigAction::Set { key, value } => {
            let path = Config::config_path();
            let mut config = Config::load_from(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            set_value(&mut config, &key, &value)?;
            config
                .save_to(&path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            println!("  {} = {}", key, value);
        }
        ConfigAction::Show { json } => {
            let config = super::load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
        ConfigAction::List => {
            for (key, description) in KEYS {
                println!("  {:<24} {}", key, description);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Reset => {
            let path = Config::config_path();
            Config::default()
                .save_to(&path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            println!("  Configuration reset to defaults.");
        }
    }

    Ok(())
}

/// Current value of `key`, or `None` when it is unset.
fn get_value(config: &Config, key: &str) -> Result<Option<String>> {
    let value = match key {
        "general.display_name" => config.general.display_name.clone(),
        "general.device_name" => config.general.device_name.clone(),
        "transfer.chunk_size" => Some(format!(
            "{} ({})",
            config.transfer.chunk_size,
            format_size(config.transfer.chunk_size)
        )),
        "transfer.auto_accept" => Some(config.transfer.auto_accept.to_string()),
        "transfer.output_dir" => config
            .transfer
            .output_dir
            .as_ref()
            .map(|dir| dir.display().to_string()),
        _ => bail!("Unknown configuration key: {key}"),
    };
    Ok(value)
}

/// Set `key` from its string form. An empty value clears optional keys.
fn set_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let optional = || {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };

    match key {
        "general.display_name" => config.general.display_name = optional(),
        "general.device_name" => config.general.device_name = optional(),
        "transfer.chunk_size" => {
            let size = parse_size(value)
                .with_context(|| format!("Invalid size for {key}: {value}"))?;
            config.transfer.chunk_size = size;
        }
        "transfer.auto_accept" => {
            config.transfer.auto_accept = value
                .trim()
                .parse()
                .with_context(|| format!("Expected true or false for {key}"))?;
        }
        "transfer.output_dir" => config.transfer.output_dir = optional().map(PathBuf::from),
        _ => bail!("Unknown configuration key: {key}"),
    }

    config.validate()?;
    Ok(())
}
