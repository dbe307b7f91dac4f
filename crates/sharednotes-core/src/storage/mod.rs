//! Storage layer
//!
//! SQLite holds the local copy of every note the user has opened or
//! edited. Notes are keyed by title; there is no other entity.

pub mod error;
pub mod notes;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use notes::SqliteNotes;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
