//! Error types for WebDrop.
//!
//! This module provides a unified error type for all WebDrop operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for WebDrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for WebDrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Transfer was cancelled because its session closed
    #[error("transfer cancelled")]
    TransferCancelled,

    /// The transport failed to deliver a chunk
    #[error("delivery of chunk {chunk} of '{file}' failed: {reason}")]
    DeliveryFailed {
        /// The file being transferred
        file: String,
        /// The chunk index that failed
        chunk: u64,
        /// Reason reported by the transport
        reason: String,
    },

    /// Transport-level failure unrelated to a specific chunk
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer is not known to the transport
    #[error("peer '{0}' is not connected")]
    PeerNotConnected(String),

    /// Output sink failure
    #[error("output sink error for '{file}': {reason}")]
    Sink {
        /// Name of the file being written
        file: String,
        /// Reason for failure
        reason: String,
    },

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns whether this error means the transfer was cancelled rather than failed.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::TransferCancelled)
    }

    /// Returns whether this error came from the transport layer.
    ///
    /// Retrying these belongs to the transport; transfers never retry
    /// individual chunks.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::DeliveryFailed { .. } | Self::Transport(_) | Self::PeerNotConnected(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
