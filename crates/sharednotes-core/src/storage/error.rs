//! Storage error handling
//!
//! Local storage is assumed durable, so every error here is fatal to
//! whatever sync operation hit it.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during local storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to open the database file
    #[error("Failed to open database at '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored version does not fit the note model
    #[error("Note '{title}' has an invalid stored version: {version}")]
    InvalidVersion { title: String, version: i64 },

    /// Version is too large to store
    #[error("Note '{title}' has a version too large to store: {version}")]
    VersionOverflow { title: String, version: u64 },

    /// A thread panicked while holding the connection
    #[error("Database connection lock was poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            StorageError::Open { .. } => {
                Some("Check that data_dir points to a writable location, or remove the corrupted database file.")
            }
            _ => None,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
