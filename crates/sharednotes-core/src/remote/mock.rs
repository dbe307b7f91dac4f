//! In-memory remote store for tests
//!
//! Behaves like a tiny notes server: `put` stores, `get` returns the stored
//! copy or `NotFound`. Failures can be queued per title, and every fetch is
//! logged along with how many fetches were in flight at once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::RemoteStore;
use crate::models::Note;
use crate::sync::{SyncError, SyncResult};

/// A failure to inject into the next fetch of a title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Transport,
    NotFound,
    Malformed,
}

/// Scripted remote store
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    notes: Mutex<HashMap<String, Note>>,
    failures: Mutex<HashMap<String, VecDeque<MockFailure>>>,
    fetch_log: Mutex<Vec<String>>,
    puts: Mutex<Vec<Note>>,
    latency: Mutex<Duration>,
    fail_puts: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemoteStore {
    /// Create an empty mock server
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server's copy of a note
    pub fn set_note(&self, note: Note) {
        self.notes.lock().unwrap().insert(note.title.clone(), note);
    }

    /// Remove the server's copy of a note
    pub fn remove_note(&self, title: &str) {
        self.notes.lock().unwrap().remove(title);
    }

    /// Get the server's copy of a note
    pub fn note(&self, title: &str) -> Option<Note> {
        self.notes.lock().unwrap().get(title).cloned()
    }

    /// Make the next fetch of `title` fail
    ///
    /// Failures queue up and are consumed one per fetch.
    pub fn push_failure(&self, title: &str, failure: MockFailure) {
        self.failures
            .lock()
            .unwrap()
            .entry(title.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Delay every request by `latency` (tokio time, so it honours paused clocks)
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Make every `put` fail with a transport error
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Titles fetched so far, in order
    pub fn fetch_log(&self) -> Vec<String> {
        self.fetch_log.lock().unwrap().clone()
    }

    /// Number of fetches started for `title`
    pub fn fetch_count(&self, title: &str) -> usize {
        self.fetch_log
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == title)
            .count()
    }

    /// Notes received by `put`, in order (including failed attempts)
    pub fn puts(&self) -> Vec<Note> {
        self.puts.lock().unwrap().clone()
    }

    /// Highest number of fetches that were running at the same time
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn latency(&self) -> Duration {
        *self.latency.lock().unwrap()
    }
}

/// Tracks one in-flight fetch; released on completion or cancellation
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn get(&self, title: &str) -> SyncResult<Note> {
        self.fetch_log.lock().unwrap().push(title.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(title)
            .and_then(VecDeque::pop_front);

        match failure {
            Some(MockFailure::Transport) => {
                Err(SyncError::Transport("connection reset".to_string()))
            }
            Some(MockFailure::NotFound) => Err(SyncError::NotFound {
                title: title.to_string(),
            }),
            Some(MockFailure::Malformed) => Err(SyncError::MalformedResponse {
                title: title.to_string(),
                source: serde_json::from_str::<Note>("<html>").unwrap_err(),
            }),
            None => self.note(title).ok_or_else(|| SyncError::NotFound {
                title: title.to_string(),
            }),
        }
    }

    async fn put(&self, note: &Note) -> SyncResult<()> {
        self.puts.lock().unwrap().push(note.clone());

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("server unavailable".to_string()));
        }

        self.set_note(note.clone());
        Ok(())
    }
}
