//! Sync error handling
//!
//! Remote failures are contained by the engine (logged and reported as
//! events). Storage failures propagate, since the local copy is the source
//! of truth and there is nothing to fall back on.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while talking to the remote store or syncing
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network failure, timeout, or unexpected HTTP status
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The server has no note with this title
    #[error("Note not found on server: '{title}'")]
    NotFound { title: String },

    /// The server answered with a body that is not a note
    #[error("Malformed response for '{title}': {source}")]
    MalformedResponse {
        title: String,
        #[source]
        source: serde_json::Error,
    },

    /// The server sent a version too large to store locally
    #[error("Version {version} of '{title}' is out of range")]
    VersionOutOfRange { title: String, version: u64 },

    /// The configured server URL cannot address notes
    #[error("Invalid server URL '{0}'")]
    InvalidUrl(String),

    /// A result arrived for a poller that has since been replaced
    #[error("Result discarded: poller was cancelled")]
    Cancelled,

    /// Local storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Whether this error came from the remote side and should only be reported
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::NotFound { .. }
                | SyncError::MalformedResponse { .. }
                | SyncError::VersionOutOfRange { .. }
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        SyncError::Transport(error.to_string())
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_classification() {
        assert!(SyncError::Transport("timeout".into()).is_remote());
        assert!(SyncError::NotFound {
            title: "a".into()
        }
        .is_remote());
        assert!(SyncError::VersionOutOfRange {
            title: "a".into(),
            version: u64::MAX
        }
        .is_remote());
        assert!(!SyncError::Cancelled.is_remote());
        assert!(!SyncError::Storage(StorageError::LockPoisoned).is_remote());
    }

    #[test]
    fn test_malformed_display() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SyncError::MalformedResponse {
            title: "Groceries".into(),
            source,
        };

        let msg = err.to_string();
        assert!(msg.contains("Malformed"));
        assert!(msg.contains("Groceries"));
    }

    #[test]
    fn test_storage_is_transparent() {
        let err: SyncError = StorageError::LockPoisoned.into();
        assert_eq!(err.to_string(), StorageError::LockPoisoned.to_string());
    }
}
