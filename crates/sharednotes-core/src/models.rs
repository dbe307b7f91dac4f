//! Data models for SharedNotes
//!
//! A note is identified by its title. The version counter drives
//! last-writer-wins reconciliation with the remote server: it only moves
//! forward on local writes and is copied verbatim when a remote copy wins.

use serde::{Deserialize, Serialize};

/// Highest version the local store can hold (SQLite integers are signed)
pub const MAX_VERSION: u64 = i64::MAX as u64;

/// A titled text note with a version counter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    /// Identity key, unique per note
    pub title: String,
    /// Note body
    pub content: String,
    /// Monotonic counter, bumped once per local write
    pub version: u64,
}

impl Note {
    /// Create a new note at version 0
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            version: 0,
        }
    }

    /// Create a note with an explicit version (for loading from storage or the wire)
    pub fn with_version(title: impl Into<String>, content: impl Into<String>, version: u64) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            version,
        }
    }

    /// Replace the content
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    /// Whether the version fits in local storage
    pub fn has_storable_version(&self) -> bool {
        self.version <= MAX_VERSION
    }

    /// Return a copy with the version advanced by one
    pub fn bumped(&self) -> Self {
        Self {
            version: self.version.saturating_add(1),
            ..self.clone()
        }
    }
}
