//! Observable local note store
//!
//! `NoteStore` wraps the SQLite note table and publishes every mutation on
//! `tokio::sync::watch` channels:
//!
//! - one channel per observed title, carrying `Option<Note>` (absent after
//!   a delete or before the first write)
//! - one channel carrying the full, title-ordered list
//!
//! Every mutation publishes, even when the stored value did not change, so
//! observers see one notification per write.
//!
//! ## Usage
//!
//! ```ignore
//! let store = NoteStore::open(&config)?;
//! let mut rx = store.watch("Groceries")?;
//! store.upsert(&Note::new("Groceries", "milk"))?;
//! rx.changed().await?;
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::config::Config;
use crate::models::Note;
use crate::storage::{SqliteNotes, StorageError, StorageResult};

/// SQLite-backed note store with change notification
pub struct NoteStore {
    /// Note table; held across publish so emissions follow write order
    notes: Mutex<SqliteNotes>,
    /// Per-title observers
    watchers: Mutex<HashMap<String, watch::Sender<Option<Note>>>>,
    /// Observers of the full list
    all: watch::Sender<Vec<Note>>,
}

impl NoteStore {
    /// Open the on-disk store described by `config`
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::from_notes(SqliteNotes::open(config)?)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_notes(SqliteNotes::open_in_memory()?)
    }

    fn from_notes(notes: SqliteNotes) -> StorageResult<Self> {
        let (all, _) = watch::channel(notes.get_all()?);
        Ok(Self {
            notes: Mutex::new(notes),
            watchers: Mutex::new(HashMap::new()),
            all,
        })
    }

    /// Get the current value of a note
    pub fn get(&self, title: &str) -> StorageResult<Option<Note>> {
        self.lock_notes()?.get(title)
    }

    /// Observe a note by title
    ///
    /// The receiver starts at the current value (already marked seen) and is
    /// notified on every subsequent upsert or delete of that title.
    pub fn watch(&self, title: &str) -> StorageResult<watch::Receiver<Option<Note>>> {
        let notes = self.lock_notes()?;
        let current = notes.get(title)?;

        let mut watchers = self.lock_watchers()?;
        watchers.retain(|_, tx| tx.receiver_count() > 0);

        let rx = match watchers.get(title) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(current);
                watchers.insert(title.to_string(), tx);
                rx
            }
        };

        Ok(rx)
    }

    /// Get all notes, ordered by title
    pub fn get_all(&self) -> StorageResult<Vec<Note>> {
        self.lock_notes()?.get_all()
    }

    /// Observe the full note list
    pub fn watch_all(&self) -> watch::Receiver<Vec<Note>> {
        self.all.subscribe()
    }

    /// Insert or replace a note exactly as given
    ///
    /// The version is stored verbatim; callers decide whether to bump it.
    pub fn upsert(&self, note: &Note) -> StorageResult<()> {
        let notes = self.lock_notes()?;
        notes.upsert(note)?;
        debug!(title = %note.title, version = note.version, "Stored note");
        self.publish(&notes, &note.title, Some(note.clone()))
    }

    /// Read a note and conditionally replace it without interleaving writes
    ///
    /// `decide` sees the current value under the store lock. Returning a note
    /// stores it verbatim and publishes it; returning `None` leaves the store
    /// untouched and publishes nothing.
    pub fn update_with<F>(&self, title: &str, decide: F) -> StorageResult<Option<Note>>
    where
        F: FnOnce(Option<&Note>) -> Option<Note>,
    {
        let notes = self.lock_notes()?;
        let current = notes.get(title)?;

        let Some(next) = decide(current.as_ref()) else {
            return Ok(None);
        };

        notes.upsert(&next)?;
        debug!(title = %next.title, version = next.version, "Replaced note");
        self.publish(&notes, &next.title, Some(next.clone()))?;
        Ok(Some(next))
    }

    /// Delete a note
    pub fn delete(&self, note: &Note) -> StorageResult<()> {
        let notes = self.lock_notes()?;
        let removed = notes.delete(&note.title)?;
        debug!(title = %note.title, removed, "Deleted note");
        self.publish(&notes, &note.title, None)
    }

    /// Check whether a note with this title exists
    pub fn exists(&self, title: &str) -> StorageResult<bool> {
        self.lock_notes()?.exists(title)
    }

    /// Count stored notes
    pub fn count(&self) -> StorageResult<i64> {
        self.lock_notes()?.count()
    }

    fn publish(&self, notes: &SqliteNotes, title: &str, value: Option<Note>) -> StorageResult<()> {
        if let Some(tx) = self.lock_watchers()?.get(title) {
            tx.send_replace(value);
        }
        self.all.send_replace(notes.get_all()?);
        Ok(())
    }

    fn lock_notes(&self) -> StorageResult<MutexGuard<'_, SqliteNotes>> {
        self.notes.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn lock_watchers(
        &self,
    ) -> StorageResult<MutexGuard<'_, HashMap<String, watch::Sender<Option<Note>>>>> {
        self.watchers.lock().map_err(|_| StorageError::LockPoisoned)
    }
}
