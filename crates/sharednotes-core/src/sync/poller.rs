//! Remote poller
//!
//! The server never pushes, so a watched note is fetched immediately and
//! then on a fixed schedule measured from the moment polling started. A
//! fetch that overruns its slot causes the missed ticks to be skipped; the
//! loop is sequential, so two fetches of one poller never overlap.
//!
//! ## Cancellation
//!
//! Each poller instance is stamped with a generation number taken from a
//! counter shared by every instance the owner creates. Cancelling bumps the
//! counter, which invalidates the old stamp atomically:
//!
//! - the loop stops scheduling ticks and drops any fetch still in flight
//! - a result that completed anyway is compared against the counter before
//!   it is published, and again (under [`PollToken::run_if_current`])
//!   before anything is written locally
//!
//! `start` waits for the previous loop task to exit before the new one
//! issues its first fetch, so fetches for two titles never run at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{SyncError, SyncResult};
use super::event::{EventSink, SyncEvent};
use crate::models::Note;
use crate::remote::RemoteStore;

/// Shortest accepted poll period
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Buffered remote results per poller
const REMOTE_BUFFER: usize = 16;

/// Lifecycle of the current poller instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    /// Nothing has been polled yet
    Idle,
    /// Fetching `title` on schedule
    Polling { title: String },
    /// The last instance was cancelled and none replaced it
    Cancelled { title: String },
}

/// Generation counter plus the gate that serializes cancellation against
/// writes made on behalf of a poller
#[derive(Debug, Default)]
struct Generation {
    current: AtomicU64,
    gate: Mutex<()>,
}

/// Stamp identifying one poller instance
#[derive(Debug, Clone)]
pub struct PollToken {
    generation: u64,
    shared: Arc<Generation>,
}

impl PollToken {
    /// Generation this token was issued for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the issuing poller is still the active one
    pub fn is_current(&self) -> bool {
        self.shared.current.load(Ordering::SeqCst) == self.generation
    }

    /// Run `f` only if the issuing poller is still active
    ///
    /// Cancellation cannot take effect while `f` runs, so a write made here
    /// can never land after the poller was replaced.
    pub fn run_if_current<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = self
            .shared
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.is_current().then(f)
    }
}

/// A fetched note, tagged with the poller that fetched it
#[derive(Debug, Clone)]
pub struct RemoteUpdate {
    pub note: Note,
    pub token: PollToken,
}

struct ActivePoll {
    title: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one periodic fetch loop
pub struct RemotePoller {
    remote: Arc<dyn RemoteStore>,
    interval: Duration,
    generation: Arc<Generation>,
    active: Option<ActivePoll>,
    state: Arc<watch::Sender<PollerState>>,
    events: EventSink,
}

impl RemotePoller {
    pub(crate) fn new(remote: Arc<dyn RemoteStore>, interval: Duration, events: EventSink) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            remote,
            interval: interval.max(MIN_POLL_INTERVAL),
            generation: Arc::new(Generation::default()),
            active: None,
            state: Arc::new(state),
            events,
        }
    }

    /// Poll period in use
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Title currently being polled
    pub fn title(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.title.as_str())
    }

    /// Whether a loop is running
    pub fn is_polling(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Current lifecycle state
    pub fn state(&self) -> PollerState {
        self.state.borrow().clone()
    }

    /// Subscribe to lifecycle changes
    pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Replace any running loop with one polling `title`
    ///
    /// Returns the stream the new loop publishes to. The first fetch is
    /// issued immediately, after the previous loop (if any) has exited.
    pub async fn start(&mut self, title: &str) -> mpsc::Receiver<RemoteUpdate> {
        self.cancel().await;

        let generation = self.generation.current.fetch_add(1, Ordering::SeqCst) + 1;
        let token = PollToken {
            generation,
            shared: self.generation.clone(),
        };

        let (tx, rx) = mpsc::channel(REMOTE_BUFFER);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(poll_loop(PollLoop {
            remote: self.remote.clone(),
            title: title.to_string(),
            interval: self.interval,
            token,
            cancel: cancel.clone(),
            tx,
            events: self.events.clone(),
            state: self.state.clone(),
        }));

        self.active = Some(ActivePoll {
            title: title.to_string(),
            cancel,
            task,
        });

        info!(title, generation, interval_ms = self.interval.as_millis() as u64, "Started remote poller");
        self.state.send_replace(PollerState::Polling {
            title: title.to_string(),
        });
        self.events.emit(SyncEvent::PollerStarted {
            title: title.to_string(),
        });

        rx
    }

    /// Stop the running loop, if any, and wait for it to exit
    pub async fn cancel(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        self.invalidate(&active.cancel);

        if let Err(e) = active.task.await {
            if e.is_panic() {
                warn!(title = %active.title, "Remote poller panicked");
            }
        }

        info!(title = %active.title, "Cancelled remote poller");
        self.state.send_replace(PollerState::Cancelled {
            title: active.title.clone(),
        });
        self.events.emit(SyncEvent::PollerCancelled {
            title: active.title,
        });
    }

    fn invalidate(&self, cancel: &CancellationToken) {
        {
            let _gate = self
                .generation
                .gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.generation.current.fetch_add(1, Ordering::SeqCst);
        }
        cancel.cancel();
    }
}

impl Drop for RemotePoller {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.invalidate(&active.cancel);
        }
    }
}

struct PollLoop {
    remote: Arc<dyn RemoteStore>,
    title: String,
    interval: Duration,
    token: PollToken,
    cancel: CancellationToken,
    tx: mpsc::Sender<RemoteUpdate>,
    events: EventSink,
    state: Arc<watch::Sender<PollerState>>,
}

async fn poll_loop(ctx: PollLoop) {
    let PollLoop {
        remote,
        title,
        interval,
        token,
        cancel,
        tx,
        events,
        state,
    } = ctx;

    // First tick completes immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        debug!(title = %title, generation = token.generation(), "Polling remote");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(title = %title, "Dropped in-flight fetch");
                return;
            }
            _ = tx.closed() => break,
            result = remote.get(&title) => result.and_then(check_version),
        };

        if !token.is_current() {
            debug!(title = %title, generation = token.generation(), "Discarded stale fetch");
            return;
        }

        match result {
            Ok(note) => {
                let update = RemoteUpdate {
                    note,
                    token: token.clone(),
                };
                if tx.send(update).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                warn!(title = %title, %error, "Remote fetch failed");
                events.emit(SyncEvent::FetchFailed {
                    title: title.clone(),
                    error: error.to_string(),
                });
            }
        }
    }

    // Nobody is listening any more; stop unless a newer loop already took over
    debug!(title = %title, "Remote stream closed");
    token.run_if_current(|| {
        info!(title = %title, "Remote poller stopped");
        state.send_replace(PollerState::Cancelled { title });
    });
}

/// Reject notes the local store could not hold
fn check_version(note: Note) -> SyncResult<Note> {
    if note.has_storable_version() {
        Ok(note)
    } else {
        Err(SyncError::VersionOutOfRange {
            title: note.title,
            version: note.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockFailure, MockRemoteStore};

    fn poller(remote: Arc<MockRemoteStore>) -> (RemotePoller, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, rx) = EventSink::channel();
        (
            RemotePoller::new(remote, Duration::from_millis(3000), events),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_on_schedule() {
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_note(Note::with_version("a", "x", 1));
        let (mut poller, _events) = poller(remote.clone());

        let mut rx = poller.start("a").await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.note.version, 1);
        assert!(first.token.is_current());
        assert_eq!(remote.fetch_count("a"), 1);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(remote.fetch_count("a"), 1);

        rx.recv().await.unwrap();
        assert_eq!(remote.fetch_count("a"), 2);

        tokio::time::sleep(Duration::from_millis(6050)).await;
        assert_eq!(remote.fetch_count("a"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_polling() {
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_note(Note::with_version("a", "x", 1));
        remote.push_failure("a", MockFailure::Transport);
        remote.push_failure("a", MockFailure::Malformed);
        let (mut poller, mut events) = poller(remote.clone());

        let mut rx = poller.start("a").await;

        // Third tick succeeds
        let update = rx.recv().await.unwrap();
        assert_eq!(update.note.version, 1);
        assert_eq!(remote.fetch_count("a"), 3);

        assert_eq!(
            events.recv().await,
            Some(SyncEvent::PollerStarted { title: "a".into() })
        );
        assert!(matches!(
            events.recv().await,
            Some(SyncEvent::FetchFailed { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SyncEvent::FetchFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_skips_missed_ticks() {
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_note(Note::new("a", "x"));
        remote.set_latency(Duration::from_millis(7000));
        let (mut poller, _events) = poller(remote.clone());

        let _rx = poller.start("a").await;

        // Fetch 1 runs 0..7000 and the overdue tick fires once on return.
        // Fetch 2 runs 7000..14000; the 9000 and 12000 slots are dropped
        // rather than replayed as a burst.
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(remote.fetch_count("a"), 1);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(remote.fetch_count("a"), 2);
        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(remote.fetch_count("a"), 2);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(remote.fetch_count("a"), 3);
        assert_eq!(remote.max_concurrent_fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_title() {
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_note(Note::new("a", "x"));
        remote.set_note(Note::new("b", "y"));
        remote.set_latency(Duration::from_millis(1000));
        let (mut poller, _events) = poller(remote.clone());

        let mut rx_a = poller.start("a").await;
        rx_a.recv().await.unwrap();

        // Switch while the second fetch of "a" is in flight
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let a_fetches = remote.fetch_count("a");
        let mut rx_b = poller.start("b").await;

        let update = rx_b.recv().await.unwrap();
        assert_eq!(update.note.title, "b");

        // The old stream ends without delivering the dropped fetch
        assert!(rx_a.recv().await.is_none());

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(remote.fetch_count("a"), a_fetches);
        assert!(remote.fetch_count("b") >= 4);
        assert_eq!(remote.max_concurrent_fetches(), 1);
        assert_eq!(poller.title(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_invalidates_tokens() {
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_note(Note::new("a", "x"));
        let (mut poller, _events) = poller(remote.clone());

        let mut rx = poller.start("a").await;
        let update = rx.recv().await.unwrap();
        assert!(update.token.is_current());
        assert_eq!(update.token.run_if_current(|| 42), Some(42));

        poller.cancel().await;

        assert!(!update.token.is_current());
        assert_eq!(update.token.run_if_current(|| 42), None);
        assert!(!poller.is_polling());
        assert_eq!(
            poller.state(),
            PollerState::Cancelled { title: "a".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let remote = Arc::new(MockRemoteStore::new());
        let (mut poller, _events) = poller(remote);
        let states = poller.subscribe_state();

        assert_eq!(poller.state(), PollerState::Idle);

        let _rx = poller.start("a").await;
        assert_eq!(*states.borrow(), PollerState::Polling { title: "a".into() });

        let _rx = poller.start("b").await;
        assert_eq!(*states.borrow(), PollerState::Polling { title: "b".into() });

        poller.cancel().await;
        assert_eq!(*states.borrow(), PollerState::Cancelled { title: "b".into() });

        // Cancelling again is a no-op
        poller.cancel().await;
        assert_eq!(*states.borrow(), PollerState::Cancelled { title: "b".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_loop() {
        let remote = Arc::new(MockRemoteStore::new());
        remote.set_note(Note::new("a", "x"));
        let (mut poller, _events) = poller(remote.clone());

        let mut rx = poller.start("a").await;
        rx.recv().await.unwrap();
        drop(poller);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(remote.fetch_count("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_stream_dropped() {
        let remote = Arc::new(MockRemoteStore::new());
        for _ in 0..5 {
            remote.push_failure("a", MockFailure::Transport);
        }
        let (mut poller, _events) = poller(remote.clone());

        let mut rx = poller.start("a").await;
        // Let a couple of failing ticks run first
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(remote.fetch_count("a"), 2);

        rx.close();
        drop(rx);
        tokio::time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(remote.fetch_count("a"), 2);
        assert!(!poller.is_polling());
        assert_eq!(
            poller.state(),
            PollerState::Cancelled { title: "a".into() }
        );

        // A fresh start still works
        remote.set_note(Note::new("a", "x"));
        let mut rx = poller.start("a").await;
        let update = rx.recv().await.unwrap();
        assert_eq!(update.note.title, "a");
        assert!(poller.is_polling());
    }

    #[test]
    fn test_interval_has_floor() {
        let (events, _rx) = EventSink::channel();
        let poller = RemotePoller::new(
            Arc::new(MockRemoteStore::new()),
            Duration::ZERO,
            events,
        );
        assert_eq!(poller.interval(), MIN_POLL_INTERVAL);
    }
}
