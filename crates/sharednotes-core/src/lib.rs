//! SharedNotes Core Library
//!
//! This crate provides the core functionality for SharedNotes, a notes
//! app whose local copies are kept in sync with a shared server.
//!
//! # Architecture
//!
//! - **SQLite**: Local source of truth; every change is observable
//! - **HTTP server**: Poll-only remote copy, reconciled by version number
//!
//! What callers see always comes from the local store. Remote copies only
//! become visible after they have been merged into it.
//!
//! # Quick Start
//!
//! ```text
//! let engine = SyncEngine::open(&Config::load()?)?;
//!
//! // Follow a note
//! let mut synced = engine.get_synced("Groceries").await?;
//!
//! // Edit it (stored locally, pushed in the background)
//! engine.upsert_synced(&Note::new("Groceries", "milk"))?;
//! ```
//!
//! # Modules
//!
//! - `sync`: Poller, merge rule and sync engine (main entry point)
//! - `store`: Observable local note store
//! - `remote`: Remote store trait, HTTP client and test double
//! - `models`: The note type
//! - `storage`: SQLite schema and queries
//! - `config`: Application configuration

pub mod config;
pub mod models;
pub mod remote;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use models::Note;
pub use remote::{HttpRemoteStore, MockFailure, MockRemoteStore, RemoteStore};
pub use storage::{StorageError, StorageResult};
pub use store::NoteStore;
pub use sync::{PollerState, SyncEngine, SyncError, SyncEvent, SyncResult, SyncedNote};
