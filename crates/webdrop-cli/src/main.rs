//! WebDrop CLI - chunked peer-to-peer file transfer
//!
//! WebDrop streams files between peers over an already-established
//! transport. The CLI drives the transfer engine in-process and manages the
//! shared configuration.
//!
//! ## Quick Start
//!
//! ```bash
//! # Send files through an in-process peer and save them to ./inbox
//! webdrop loopback ./document.pdf --output ./inbox
//!
//! # Change the chunk size used for outgoing transfers
//! webdrop config set transfer.chunk_size 256k
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Loopback(args) => commands::loopback::run(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,webdrop=info,webdrop_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
