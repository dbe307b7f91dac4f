//! Watch command handler

use anyhow::Result;
use futures_util::StreamExt;

use sharednotes_core::{SyncEngine, SyncEvent};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::output::Output;

/// Follow a note until Ctrl-C, printing each new value
pub async fn watch(engine: &mut SyncEngine, title: String, output: &Output) -> Result<()> {
    let mut events = engine.take_events();
    let synced = engine.get_synced(&title).await?;

    if synced.latest().is_none() {
        output.message(&format!("No local copy of '{}' yet, waiting for the server...", title));
    }

    let mut notes = Box::pin(synced.into_stream());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            note = notes.next() => match note {
                Some(Ok(note)) => output.print_note(&note),
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },
            Some(event) = recv_event(&mut events) => output.event(&event),
        }
    };

    engine.shutdown().await;
    result
}

async fn recv_event(events: &mut Option<UnboundedReceiver<SyncEvent>>) -> Option<SyncEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
