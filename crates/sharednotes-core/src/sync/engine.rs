//! Sync engine
//!
//! `SyncEngine` keeps one note at a time in sync with the server. A
//! subscription (`get_synced`) fans two streams into one output:
//!
//! - local changes from [`NoteStore::watch`], forwarded as they happen
//! - remote fetches from the [`RemotePoller`], merged into the store when
//!   they are newer (the store then re-emits them)
//!
//! The store is the only source of what subscribers see. Starting a new
//! subscription ends the previous output and replaces the poller.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::open(&config)?;
//! let mut synced = engine.get_synced("Groceries").await?;
//! while let Some(note) = synced.next().await? {
//!     println!("{}", note.content);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::error::{SyncError, SyncResult};
use super::event::{EventSink, SyncEvent};
use super::merge::{resolve, MergeDecision};
use super::poller::{PollerState, RemotePoller, RemoteUpdate};
use crate::config::Config;
use crate::models::Note;
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::store::NoteStore;

/// Live view of one synced note
///
/// Yields the current local value first (if any), then every later change.
/// The stream ends when a newer subscription replaces it or the engine
/// shuts down, and fails if the local store fails while merging.
pub struct SyncedNote {
    title: String,
    rx: watch::Receiver<Option<Note>>,
    fatal: oneshot::Receiver<SyncError>,
}

impl SyncedNote {
    /// Title being synced
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Most recent value, without waiting
    pub fn latest(&self) -> Option<Note> {
        self.rx.borrow().clone()
    }

    /// Whether a value arrived that `next`/`changed` has not returned yet
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next emission
    ///
    /// Returns `Ok(false)` once the stream has ended.
    pub async fn changed(&mut self) -> SyncResult<bool> {
        if self.rx.changed().await.is_ok() {
            return Ok(true);
        }
        match self.fatal.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(false),
        }
    }

    /// Wait for the next note value
    ///
    /// Deletes are skipped. Returns `Ok(None)` once the stream has ended.
    pub async fn next(&mut self) -> SyncResult<Option<Note>> {
        loop {
            if !self.changed().await? {
                return Ok(None);
            }
            if let Some(note) = self.rx.borrow_and_update().clone() {
                return Ok(Some(note));
            }
        }
    }

    /// Convert into a stream of notes
    ///
    /// The stream ends with the subscription; a fatal error is yielded once
    /// as the last item.
    pub fn into_stream(self) -> impl Stream<Item = SyncResult<Note>> {
        stream::unfold(Some(self), |state| async move {
            let mut synced = state?;
            match synced.next().await {
                Ok(Some(note)) => Some((Ok(note), Some(synced))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

struct Subscription {
    title: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ActiveSync {
    poller: RemotePoller,
    subscription: Option<Subscription>,
}

/// Orchestrates the local store, the remote store and the poller
pub struct SyncEngine {
    store: Arc<NoteStore>,
    remote: Arc<dyn RemoteStore>,
    active: Mutex<ActiveSync>,
    events: EventSink,
    event_rx: Option<mpsc::UnboundedReceiver<SyncEvent>>,
    poller_state: watch::Receiver<PollerState>,
    pushes: TaskTracker,
}

impl SyncEngine {
    /// Create an engine from explicit collaborators
    pub fn new(store: Arc<NoteStore>, remote: Arc<dyn RemoteStore>, poll_interval: Duration) -> Self {
        let (events, event_rx) = EventSink::channel();
        let poller = RemotePoller::new(remote.clone(), poll_interval, events.clone());
        let poller_state = poller.subscribe_state();

        Self {
            store,
            remote,
            active: Mutex::new(ActiveSync {
                poller,
                subscription: None,
            }),
            events,
            event_rx: Some(event_rx),
            poller_state,
            pushes: TaskTracker::new(),
        }
    }

    /// Open the on-disk store and HTTP remote described by `config`
    pub fn open(config: &Config) -> SyncResult<Self> {
        let store = NoteStore::open(config)?;
        let remote = HttpRemoteStore::from_config(config)?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(remote),
            config.poll_interval(),
        ))
    }

    /// The local store backing this engine
    pub fn store(&self) -> &Arc<NoteStore> {
        &self.store
    }

    /// Take the event receiver
    ///
    /// Can only be called once; later calls return `None`.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Current poller lifecycle state
    pub fn poller_state(&self) -> PollerState {
        self.poller_state.borrow().clone()
    }

    // ========== Synced operations ==========

    /// Observe `title`, polling the server for newer copies
    ///
    /// Any previous subscription is ended and its poller cancelled before the
    /// first fetch for `title` is issued.
    pub async fn get_synced(&self, title: &str) -> SyncResult<SyncedNote> {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.subscription.take() {
            detach(previous).await;
        }

        let mut local = self.store.watch(title)?;
        let initial = local.borrow_and_update().clone();

        let (output, rx) = watch::channel(None);
        if initial.is_some() {
            output.send_replace(initial);
        }

        let remote = active.poller.start(title).await;

        let (fatal_tx, fatal_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let forwarder = Forwarder {
            title: title.to_string(),
            store: self.store.clone(),
            local,
            remote: Some(remote),
            output,
            cancel: cancel.clone(),
            fatal: Some(fatal_tx),
            events: self.events.clone(),
        };
        let task = tokio::spawn(forwarder.run());

        active.subscription = Some(Subscription {
            title: title.to_string(),
            cancel,
            task,
        });

        Ok(SyncedNote {
            title: title.to_string(),
            rx,
            fatal: fatal_rx,
        })
    }

    /// Store a local edit and push it to the server in the background
    ///
    /// The version is incremented exactly once and the stored note is
    /// returned. The push is not awaited; its outcome is only logged and
    /// reported as a [`SyncEvent`].
    pub fn upsert_synced(&self, note: &Note) -> SyncResult<Note> {
        let stored = self.upsert_local(note, true)?;

        let remote = self.remote.clone();
        let events = self.events.clone();
        let pushed = stored.clone();
        self.pushes.spawn(async move {
            match remote.put(&pushed).await {
                Ok(()) => {
                    info!(title = %pushed.title, version = pushed.version, "Pushed note");
                    events.emit(SyncEvent::PushCompleted {
                        title: pushed.title,
                        version: pushed.version,
                    });
                }
                Err(error) => {
                    warn!(title = %pushed.title, version = pushed.version, %error, "Push failed");
                    events.emit(SyncEvent::PushFailed {
                        title: pushed.title,
                        version: pushed.version,
                        error: error.to_string(),
                    });
                }
            }
        });

        Ok(stored)
    }

    /// Wait for every background push started so far
    pub async fn drain_pushes(&self) {
        self.pushes.close();
        self.pushes.wait().await;
        self.pushes.reopen();
    }

    /// End the current subscription, stop polling and wait for pushes
    pub async fn shutdown(&self) {
        {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.subscription.take() {
                detach(previous).await;
            }
            active.poller.cancel().await;
        }
        self.drain_pushes().await;
    }

    // ========== Local operations ==========

    /// Get the local copy of a note
    pub fn get_local(&self, title: &str) -> SyncResult<Option<Note>> {
        Ok(self.store.get(title)?)
    }

    /// Snapshot of every local note, ordered by title
    pub fn get_all_local(&self) -> SyncResult<Vec<Note>> {
        Ok(self.store.get_all()?)
    }

    /// Observe the full local note list
    pub fn watch_all_local(&self) -> watch::Receiver<Vec<Note>> {
        self.store.watch_all()
    }

    /// Store a note locally without contacting the server
    ///
    /// With `increment`, the stored version is one past the given note's.
    pub fn upsert_local(&self, note: &Note, increment: bool) -> SyncResult<Note> {
        let stored = if increment { note.bumped() } else { note.clone() };
        self.store.upsert(&stored)?;
        debug!(title = %stored.title, version = stored.version, increment, "Upserted local note");
        Ok(stored)
    }

    /// Delete the local copy of a note
    pub fn delete_local(&self, note: &Note) -> SyncResult<()> {
        Ok(self.store.delete(note)?)
    }

    /// Check whether a local copy exists
    pub fn exists_local(&self, title: &str) -> SyncResult<bool> {
        Ok(self.store.exists(title)?)
    }

    // ========== Remote operations ==========

    /// Fetch the server's copy once, without touching the local store
    pub async fn get_remote(&self, title: &str) -> SyncResult<Note> {
        self.remote.get(title).await
    }

    /// Write a note to the server and wait for the result
    pub async fn upsert_remote(&self, note: &Note) -> SyncResult<()> {
        self.remote.put(note).await
    }
}

async fn detach(subscription: Subscription) {
    subscription.cancel.cancel();
    if let Err(e) = subscription.task.await {
        if e.is_panic() {
            error!(title = %subscription.title, "Subscription task panicked");
        }
    }
    debug!(title = %subscription.title, "Detached subscription");
}

/// Fans local changes and merged remote fetches into one output
struct Forwarder {
    title: String,
    store: Arc<NoteStore>,
    local: watch::Receiver<Option<Note>>,
    remote: Option<mpsc::Receiver<RemoteUpdate>>,
    output: watch::Sender<Option<Note>>,
    cancel: CancellationToken,
    fatal: Option<oneshot::Sender<SyncError>>,
    events: EventSink,
}

impl Forwarder {
    async fn run(mut self) {
        if let Err(error) = self.forward().await {
            error!(title = %self.title, %error, "Sync stopped");
            // Sent while `output` is still open so the subscriber sees it
            if let Some(fatal) = self.fatal.take() {
                let _ = fatal.send(error);
            }
        }
    }

    async fn forward(&mut self) -> SyncResult<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                _ = self.output.closed() => {
                    debug!(title = %self.title, "Subscriber dropped");
                    return Ok(());
                }
                changed = self.local.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let note = self.local.borrow_and_update().clone();
                    self.output.send_replace(note);
                }
                update = recv_remote(&mut self.remote) => match update {
                    Some(update) => self.merge(update)?,
                    None => self.remote = None,
                },
            }
        }
    }

    fn merge(&self, update: RemoteUpdate) -> SyncResult<()> {
        let RemoteUpdate { note: remote, token } = update;

        if remote.title != self.title {
            warn!(title = %self.title, remote_title = %remote.title, "Ignoring note with mismatched title");
            return Ok(());
        }

        let outcome = token
            .run_if_current(|| -> SyncResult<(Option<Note>, Option<u64>)> {
                let mut local_version = None;
                let stored = self.store.update_with(&self.title, |local| {
                    local_version = local.map(|n| n.version);
                    match resolve(local, Some(&remote)) {
                        MergeDecision::AcceptRemote => Some(remote.clone()),
                        MergeDecision::Ignore => None,
                    }
                })?;
                Ok((stored, local_version))
            })
            .unwrap_or(Err(SyncError::Cancelled));

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(SyncError::Cancelled) => {
                debug!(title = %self.title, generation = token.generation(), "Discarded result from cancelled poller");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        match outcome {
            (Some(accepted), _) => {
                info!(title = %self.title, version = accepted.version, "Accepted remote note");
                self.events.emit(SyncEvent::RemoteAccepted {
                    title: accepted.title,
                    version: accepted.version,
                });
            }
            (None, local_version) => {
                debug!(
                    title = %self.title,
                    local_version,
                    remote_version = remote.version,
                    "Remote note not newer"
                );
                self.events.emit(SyncEvent::RemoteIgnored {
                    title: remote.title,
                    local_version: local_version.unwrap_or_default(),
                    remote_version: remote.version,
                });
            }
        }

        Ok(())
    }
}

/// Receive from the remote stream, or wait forever once it has closed
async fn recv_remote(remote: &mut Option<mpsc::Receiver<RemoteUpdate>>) -> Option<RemoteUpdate> {
    match remote {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockFailure, MockRemoteStore};
    use crate::storage::StorageError;

    const INTERVAL: Duration = Duration::from_millis(3000);

    fn engine() -> (SyncEngine, Arc<NoteStore>, Arc<MockRemoteStore>) {
        let store = Arc::new(NoteStore::open_in_memory().unwrap());
        let remote = Arc::new(MockRemoteStore::new());
        let engine = SyncEngine::new(store.clone(), remote.clone(), INTERVAL);
        (engine, store, remote)
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_fills_empty_local() {
        let (engine, store, remote) = engine();
        remote.set_note(Note::with_version("a", "from server", 5));

        let mut synced = engine.get_synced("a").await.unwrap();
        let note = synced.next().await.unwrap().unwrap();

        assert_eq!(note, Note::with_version("a", "from server", 5));
        assert_eq!(synced.latest(), Some(note.clone()));
        assert_eq!(store.get("a").unwrap(), Some(note));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_local_value_comes_first() {
        let (engine, store, _remote) = engine();
        store.upsert(&Note::with_version("a", "local", 2)).unwrap();

        let mut synced = engine.get_synced("a").await.unwrap();

        assert!(synced.has_changed());
        let note = synced.next().await.unwrap().unwrap();
        assert_eq!(note.content, "local");
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_remote_is_ignored() {
        let (mut engine, store, remote) = engine();
        let mut events = engine.take_events().unwrap();
        store.upsert(&Note::with_version("a", "local", 3)).unwrap();
        remote.set_note(Note::with_version("a", "stale", 2));

        let mut synced = engine.get_synced("a").await.unwrap();
        synced.next().await.unwrap();

        loop {
            if let Some(SyncEvent::RemoteIgnored {
                local_version,
                remote_version,
                ..
            }) = events.recv().await
            {
                assert_eq!((local_version, remote_version), (3, 2));
                break;
            }
        }

        assert!(!synced.has_changed());
        assert_eq!(store.get("a").unwrap().unwrap().content, "local");
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_remote_keeps_its_version() {
        let (engine, store, remote) = engine();
        store.upsert(&Note::with_version("a", "local", 3)).unwrap();
        remote.set_note(Note::with_version("a", "remote", 7));

        let mut synced = engine.get_synced("a").await.unwrap();
        synced.next().await.unwrap();
        let merged = synced.next().await.unwrap().unwrap();

        assert_eq!(merged, Note::with_version("a", "remote", 7));
        assert_eq!(store.get("a").unwrap().unwrap().version, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_synced_bumps_once_and_pushes() {
        let (mut engine, store, remote) = engine();
        let mut events = engine.take_events().unwrap();

        let stored = engine
            .upsert_synced(&Note::with_version("a", "edit", 1))
            .unwrap();

        assert_eq!(stored.version, 2);
        assert_eq!(store.get("a").unwrap().unwrap().version, 2);

        engine.drain_pushes().await;
        assert_eq!(remote.puts(), vec![Note::with_version("a", "edit", 2)]);
        assert_eq!(
            events.recv().await,
            Some(SyncEvent::PushCompleted {
                title: "a".into(),
                version: 2
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_keeps_local() {
        let (mut engine, store, remote) = engine();
        let mut events = engine.take_events().unwrap();
        remote.set_fail_puts(true);

        let stored = engine
            .upsert_synced(&Note::with_version("a", "edit", 1))
            .unwrap();
        engine.drain_pushes().await;

        assert_eq!(stored.version, 2);
        assert_eq!(store.get("a").unwrap().unwrap().version, 2);
        assert!(matches!(
            events.recv().await,
            Some(SyncEvent::PushFailed { version: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_edit_is_visible_immediately() {
        let (engine, _store, _remote) = engine();
        let mut synced = engine.get_synced("a").await.unwrap();

        engine.upsert_synced(&Note::new("a", "typed")).unwrap();

        let note = synced.next().await.unwrap().unwrap();
        assert_eq!(note, Note::with_version("a", "typed", 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_ends_previous_stream() {
        let (engine, _store, remote) = engine();
        remote.set_note(Note::with_version("a", "x", 1));
        remote.set_note(Note::with_version("b", "y", 1));

        let mut first = engine.get_synced("a").await.unwrap();
        first.next().await.unwrap();

        let mut second = engine.get_synced("b").await.unwrap();
        assert_eq!(first.next().await.unwrap(), None);
        assert_eq!(second.next().await.unwrap().unwrap().title, "b");

        let a_fetches = remote.fetch_count("a");
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(remote.fetch_count("a"), a_fetches);
        assert_eq!(remote.max_concurrent_fetches(), 1);
        assert_eq!(
            engine.poller_state(),
            PollerState::Polling { title: "b".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_keeps_value_and_polling() {
        let (engine, _store, remote) = engine();
        remote.set_note(Note::with_version("a", "v1", 1));

        let mut synced = engine.get_synced("a").await.unwrap();
        synced.next().await.unwrap();

        remote.push_failure("a", MockFailure::Transport);
        remote.set_note(Note::with_version("a", "v2", 2));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(synced.latest().unwrap().version, 1);

        let note = synced.next().await.unwrap().unwrap();
        assert_eq!(note.version, 2);
        assert_eq!(remote.fetch_count("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstorable_remote_version_is_contained() {
        let (mut engine, store, remote) = engine();
        let mut events = engine.take_events().unwrap();
        store.upsert(&Note::with_version("a", "local", 3)).unwrap();
        remote.set_note(Note::with_version("a", "bad", u64::MAX));

        let mut synced = engine.get_synced("a").await.unwrap();
        assert_eq!(synced.next().await.unwrap().unwrap().version, 3);

        loop {
            if let Some(SyncEvent::FetchFailed { error, .. }) = events.recv().await {
                assert!(error.contains("out of range"));
                break;
            }
        }

        remote.set_note(Note::with_version("a", "good", 9));
        let merged = synced.next().await.unwrap().unwrap();

        assert_eq!(merged, Note::with_version("a", "good", 9));
        assert_eq!(store.get("a").unwrap().unwrap().version, 9);
        assert_eq!(
            engine.poller_state(),
            PollerState::Polling { title: "a".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_subscription_stops_polling() {
        let (engine, _store, remote) = engine();
        remote.push_failure("a", MockFailure::Transport);

        let synced = engine.get_synced("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(synced);
        tokio::time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(remote.fetch_count("a"), 1);
        assert_eq!(
            engine.poller_state(),
            PollerState::Cancelled { title: "a".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_stream() {
        let (engine, _store, remote) = engine();
        remote.set_note(Note::new("a", "x"));

        let mut synced = engine.get_synced("a").await.unwrap();
        synced.next().await.unwrap();
        engine.shutdown().await;

        assert_eq!(synced.next().await.unwrap(), None);
        assert_eq!(
            engine.poller_state(),
            PollerState::Cancelled { title: "a".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_yields_edits_then_ends() {
        use futures_util::StreamExt;

        let (engine, _store, _remote) = engine();
        let synced = engine.get_synced("a").await.unwrap();
        let mut stream = Box::pin(synced.into_stream());

        engine.upsert_synced(&Note::new("a", "one")).unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.version, 1);

        engine.shutdown().await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_local_operations() {
        let (engine, _store, _remote) = engine();
        let note = Note::with_version("a", "x", 4);

        let stored = engine.upsert_local(&note, false).unwrap();
        assert_eq!(stored.version, 4);
        assert!(engine.exists_local("a").unwrap());

        let bumped = engine.upsert_local(&stored, true).unwrap();
        assert_eq!(bumped.version, 5);
        assert_eq!(engine.get_all_local().unwrap(), vec![bumped.clone()]);

        engine.delete_local(&bumped).unwrap();
        assert!(engine.get_local("a").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remote_operations() {
        let (engine, store, remote) = engine();
        let note = Note::with_version("a", "x", 3);

        engine.upsert_remote(&note).await.unwrap();
        assert_eq!(remote.note("a"), Some(note.clone()));
        assert_eq!(engine.get_remote("a").await.unwrap(), note);
        assert!(store.get("a").unwrap().is_none());

        assert!(matches!(
            engine.get_remote("missing").await,
            Err(SyncError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_take_events_once() {
        let (mut engine, _store, _remote) = engine();
        assert!(engine.take_events().is_some());
        assert!(engine.take_events().is_none());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: SyncError = StorageError::LockPoisoned.into();
        assert!(!err.is_remote());
    }
}
