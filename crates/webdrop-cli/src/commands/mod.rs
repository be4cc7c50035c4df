//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// This function should be used by all commands that only read the user's
/// configuration. If the config file doesn't exist or can't be parsed, it
/// falls back to defaults.
pub fn load_config() -> webdrop_core::config::Config {
    webdrop_core::config::Config::load().unwrap_or_default()
}

pub mod config;
pub mod loopback;

/// WebDrop - chunked peer-to-peer file transfer
#[derive(Parser)]
#[command(name = "webdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Send files to an in-process peer and save what it receives
    Loopback(LoopbackArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the loopback command
#[derive(Parser)]
pub struct LoopbackArgs {
    /// Files to send
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Output directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Chunk size for outgoing transfers (e.g., 64k, 1M)
    #[arg(short, long)]
    pub chunk_size: Option<String>,

    /// Accept every offer without asking
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Value to set
        value: String,
    },

    /// Show all configuration
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List all available configuration keys
    List,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}
