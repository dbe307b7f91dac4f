//! Last-writer-wins resolution
//!
//! | local    | remote   | decision |
//! |----------|----------|----------|
//! | absent   | present  | accept   |
//! | any      | absent   | ignore   |
//! | v1       | v2 > v1  | accept   |
//! | v1       | v2 <= v1 | ignore   |
//!
//! Equal versions are ignored so a steady-state poll never rewrites the
//! local copy.

use crate::models::Note;

/// Outcome of comparing a local note with a remote one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Store the remote note verbatim (no version bump)
    AcceptRemote,
    /// Keep the local note
    Ignore,
}

/// Decide whether a remote note supersedes the local one
pub fn resolve(local: Option<&Note>, remote: Option<&Note>) -> MergeDecision {
    match (local, remote) {
        (_, None) => MergeDecision::Ignore,
        (None, Some(_)) => MergeDecision::AcceptRemote,
        (Some(local), Some(remote)) if remote.version > local.version => {
            MergeDecision::AcceptRemote
        }
        (Some(_), Some(_)) => MergeDecision::Ignore,
    }
}
