//! Error types

use std::path::PathBuf;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key derivation or cipher setup failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Authentication failed while opening sealed data
    #[error("Wrong passphrase or corrupted seed")]
    WrongPassphrase,

    /// Snapshot written by an unknown format version
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version in the file
        found: u64,
        /// Version this build reads
        expected: u32,
    },

    /// No snapshot at the path
    #[error("Snapshot not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Structurally invalid data
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    /// A watch-only snapshot was asked for its seed
    #[error("Watch-only wallet has no seed")]
    NoSeed,
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
