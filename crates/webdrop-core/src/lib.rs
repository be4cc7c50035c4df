//! # WebDrop Core Library
//!
//! `webdrop-core` provides the transfer engine behind WebDrop, a
//! peer-to-peer file drop that runs over any already-established peer
//! transport.
//!
//! ## Features
//!
//! - **Offer / accept**: files are announced and streamed only once the
//!   receiving side accepts
//! - **Out-of-order reassembly**: chunks may arrive in any order and are
//!   written strictly in order
//! - **Aggregate progress**: one progress value per peer across all of its
//!   transfers in both directions
//! - **Clean cancellation**: a peer leaving stops every transfer with it and
//!   discards partial output
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`mod@file`] - Outgoing file sources
//! - [`identity`] - Local display name and device class
//! - [`protocol`] - Control messages and chunk framing
//! - [`sink`] - Output sinks for received files
//! - [`transfer`] - Sessions, reassembly and the coordinator
//! - [`transport`] - The transport seam and an in-process transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use webdrop_core::transfer::{AutoAccept, TransferCoordinator};
//!
//! let (transport, inbound) = network.join(peer_id.clone()).await;
//! let (coordinator, mut events) = TransferCoordinator::new(
//!     identity,
//!     settings,
//!     Arc::new(transport),
//!     Arc::new(FsSinkFactory::new(config.output_dir())),
//!     Arc::new(AutoAccept),
//! );
//! coordinator.run(inbound).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod error;
pub mod file;
pub mod identity;
pub mod protocol;
pub mod sink;
pub mod transfer;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size for file transfers (1 MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
