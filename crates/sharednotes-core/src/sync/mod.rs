//! Poll-based synchronization
//!
//! The server offers plain `GET`/`PUT` per note and never pushes, so
//! freshness comes from polling:
//!
//! - [`RemotePoller`] fetches one title on a fixed schedule
//! - [`resolve`] decides whether a fetched copy supersedes the local one
//!   (higher version wins, ties keep local)
//! - [`SyncEngine`] wires both to the [`NoteStore`](crate::store::NoteStore)
//!   and pushes local edits in the background
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = SyncEngine::open(&config)?;
//! let events = engine.take_events();
//! let mut synced = engine.get_synced("Groceries").await?;
//! engine.upsert_synced(&Note::new("Groceries", "milk, eggs"))?;
//! ```

mod engine;
mod error;
mod event;
mod merge;
mod poller;

pub use engine::{SyncEngine, SyncedNote};
pub use error::{SyncError, SyncResult};
pub use event::SyncEvent;
pub use merge::{resolve, MergeDecision};
pub use poller::{PollToken, PollerState, RemotePoller, RemoteUpdate, MIN_POLL_INTERVAL};
