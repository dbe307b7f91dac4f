//! Remote command handlers

use anyhow::{Context, Result};

use sharednotes_core::{Config, HttpRemoteStore, SyncEngine};

use crate::output::Output;

/// Fetch the server's copy of a note, leaving the local copy untouched
pub async fn fetch(engine: &SyncEngine, title: String, output: &Output) -> Result<()> {
    let note = engine
        .get_remote(&title)
        .await
        .with_context(|| format!("Failed to fetch '{}'", title))?;

    output.print_note(&note);
    Ok(())
}

/// Ask the server to echo a message back
pub async fn ping(config: &Config, message: &str, output: &Output) -> Result<()> {
    let remote = HttpRemoteStore::from_config(config)?;
    let reply = remote
        .echo(message)
        .await
        .with_context(|| format!("Server at {} is unreachable", remote.base_url()))?;

    output.success(&format!("{} replied: {}", remote.base_url(), reply));
    Ok(())
}
