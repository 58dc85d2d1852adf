//! Error types for deepwatt-store.

use std::path::PathBuf;

/// Result type for deepwatt-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in deepwatt-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A reading was submitted without a device identifier.
    #[error("Device identifier cannot be empty")]
    EmptyDeviceId,

    /// The database was written by a newer version of this crate.
    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },
}
