//! Edit command handler

use anyhow::{bail, Context, Result};

use sharednotes_core::{Note, SyncEngine, SyncEvent};

use crate::editor::edit_text;
use crate::output::Output;

/// Replace a note's content and push it to the server
///
/// The push runs in the background but is awaited before returning so the
/// process does not exit mid-request.
pub async fn edit(
    engine: &mut SyncEngine,
    title: String,
    content: Option<String>,
    output: &Output,
) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Note title cannot be empty");
    }

    let mut events = engine.take_events();
    let current = engine.get_local(&title)?;
    let mut note = current.clone().unwrap_or_else(|| Note::new(title.as_str(), ""));

    let content = match content {
        Some(c) => c,
        None => edit_text(&note.content)
            .context("Failed to edit note")?
            .trim_end()
            .to_string(),
    };

    if current.is_some_and(|c| c.content == content) {
        output.message("No changes.");
        return Ok(());
    }

    note.set_content(content);
    let stored = engine.upsert_synced(&note).context("Failed to save note")?;
    engine.drain_pushes().await;

    if let Some(rx) = events.as_mut() {
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SyncEvent::PushFailed { .. }) {
                output.event(&event);
                output.message("Saved locally; the server copy was not updated.");
            }
        }
    }

    output.success(&format!(
        "Saved '{}' (version {})",
        stored.title, stored.version
    ));

    Ok(())
}
