//! Local note command handlers

use anyhow::{Context, Result};

use sharednotes_core::SyncEngine;

use crate::editor::confirm;
use crate::output::Output;

/// Show the local copy of a note
pub fn show(engine: &SyncEngine, title: String, output: &Output) -> Result<()> {
    let note = engine
        .get_local(&title)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: '{}'", title))?;

    output.print_note(&note);
    Ok(())
}

/// List all local notes
pub fn list(engine: &SyncEngine, output: &Output) -> Result<()> {
    let notes = engine.get_all_local()?;
    output.print_notes(&notes);
    Ok(())
}

/// Delete the local copy of a note
pub fn delete(engine: &SyncEngine, title: String, output: &Output) -> Result<()> {
    let note = engine
        .get_local(&title)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: '{}'", title))?;

    if output.should_prompt() {
        println!("Delete note: {} (version {})", note.title, note.version);
        println!("The server copy is kept and will return on the next sync.");
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    engine.delete_local(&note).context("Failed to delete note")?;

    output.success(&format!("Deleted note: '{}'", title));

    Ok(())
}
