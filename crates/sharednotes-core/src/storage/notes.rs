//! SQLite note table
//!
//! Plain row access for notes. Change notification lives one layer up in
//! [`crate::store::NoteStore`].

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::Config;
use crate::models::Note;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema::{init_schema, needs_init};

/// SQLite-backed note table
pub struct SqliteNotes {
    conn: Connection,
}

impl SqliteNotes {
    /// Open or create the database described by `config`
    pub fn open(config: &Config) -> StorageResult<Self> {
        let path = config.database_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path).map_err(|source| StorageError::Open {
            path: path.clone(),
            source,
        })?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a note by title
    pub fn get(&self, title: &str) -> StorageResult<Option<Note>> {
        let row = self
            .conn
            .query_row(
                "SELECT title, content, version FROM notes WHERE title = ?1",
                params![title],
                NoteRow::read,
            )
            .optional()?;

        row.map(NoteRow::hydrate).transpose()
    }

    /// Get all notes, ordered by title
    pub fn get_all(&self) -> StorageResult<Vec<Note>> {
        let mut stmt = self
            .conn
            .prepare("SELECT title, content, version FROM notes ORDER BY title")?;

        let rows = stmt.query_map([], NoteRow::read)?;

        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?.hydrate()?);
        }

        Ok(notes)
    }

    /// Insert or replace a note, storing its version as given
    pub fn upsert(&self, note: &Note) -> StorageResult<()> {
        let version = i64::try_from(note.version).map_err(|_| StorageError::VersionOverflow {
            title: note.title.clone(),
            version: note.version,
        })?;

        self.conn.execute(
            "INSERT INTO notes (title, content, version) VALUES (?1, ?2, ?3)
             ON CONFLICT(title) DO UPDATE SET content = excluded.content, version = excluded.version",
            params![note.title, note.content, version],
        )?;

        Ok(())
    }

    /// Delete a note by title, returning whether a row was removed
    pub fn delete(&self, title: &str) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM notes WHERE title = ?1", params![title])?;
        Ok(removed > 0)
    }

    /// Check whether a note with this title exists
    pub fn exists(&self, title: &str) -> StorageResult<bool> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM notes WHERE title = ?1")?;
        Ok(stmt.exists(params![title])?)
    }

    /// Count stored notes
    pub fn count(&self) -> StorageResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Raw row, before the version is checked
struct NoteRow {
    title: String,
    content: String,
    version: i64,
}

impl NoteRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            title: row.get(0)?,
            content: row.get(1)?,
            version: row.get(2)?,
        })
    }

    fn hydrate(self) -> StorageResult<Note> {
        let version = u64::try_from(self.version).map_err(|_| StorageError::InvalidVersion {
            title: self.title.clone(),
            version: self.version,
        })?;
        Ok(Note::with_version(self.title, self.content, version))
    }
}
