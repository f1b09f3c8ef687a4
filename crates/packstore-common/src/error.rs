//! Error types for packstore
//!
//! This module defines the common error type used by the engine, the
//! metadata store adapters and the CLI.

use crate::types::SetNameError;
use thiserror::Error;

/// Common result type for packstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for packstore
#[derive(Debug, Error)]
pub enum Error {
    // Block file errors
    #[error("block I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    // Metadata store errors
    #[error("metadata store error: {0}")]
    MetadataStore(String),

    // Record errors
    #[error("invalid location descriptor {descriptor:?}: {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error("no record for {hash} in set {set}")]
    NotFound { set: String, hash: String },

    #[error("location is hosted by {node}:{port}, not by this node")]
    ForeignNode { node: String, port: u16 },

    #[error("invalid set name: {0}")]
    InvalidSetName(#[from] SetNameError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Lifecycle errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("engine has been shut down")]
    ShutDown,
}

impl Error {
    /// Create a metadata store error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::MetadataStore(msg.into())
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a not found error
    ///
    /// A block file that disappeared underneath a record (for example after
    /// a set was deleted) counts as not found too.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if this error came from a malformed location descriptor
    #[must_use]
    pub const fn is_format_error(&self) -> bool {
        matches!(self, Self::InvalidDescriptor { .. })
    }

    /// Check if this error came from block file I/O
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ShortRead { .. })
    }
}
