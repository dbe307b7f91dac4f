//! Sync events
//!
//! Everything the engine contains instead of returning (fetch failures,
//! push outcomes, merge decisions) is reported here as well as logged.

use tokio::sync::mpsc;

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A poller began fetching a title
    PollerStarted { title: String },
    /// A poller was cancelled
    PollerCancelled { title: String },
    /// A poll tick failed; polling continues
    FetchFailed { title: String, error: String },
    /// A remote copy was newer and replaced the local one
    RemoteAccepted { title: String, version: u64 },
    /// A remote copy was not newer than the local one
    RemoteIgnored {
        title: String,
        local_version: u64,
        remote_version: u64,
    },
    /// A fire-and-forget write reached the server
    PushCompleted { title: String, version: u64 },
    /// A fire-and-forget write failed; it is not retried
    PushFailed {
        title: String,
        version: u64,
        error: String,
    },
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub(crate) struct EventSink(mpsc::UnboundedSender<SyncEvent>);

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Send an event, ignoring a closed receiver
    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.0.send(event);
    }
}
