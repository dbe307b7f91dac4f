//! Remote note store
//!
//! The server keeps the authoritative copy of every note but never pushes
//! changes; clients poll it. Implementations:
//!
//! - [`HttpRemoteStore`]: the JSON-over-HTTP notes API
//! - [`MockRemoteStore`]: scripted in-memory server for tests

mod http;
mod mock;

use async_trait::async_trait;

use crate::models::Note;
use crate::sync::SyncResult;

pub use http::{note_url, HttpRemoteStore};
pub use mock::{MockFailure, MockRemoteStore};

/// Read/write access to the remote note server
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the server's copy of a note
    ///
    /// Fails with `NotFound`, `Transport`, or `MalformedResponse`.
    async fn get(&self, title: &str) -> SyncResult<Note>;

    /// Store a note on the server, exactly as given
    async fn put(&self, note: &Note) -> SyncResult<()>;
}
