//! Interactive editing support
//!
//! Note content is edited in `$EDITOR` (or `$VISUAL`), falling back to `vi`.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::process::Command;

use anyhow::{bail, Context, Result};

const FALLBACK_EDITOR: &str = "vi";

/// Edit `initial_content` in the user's editor and return the result
///
/// The editor variable may carry arguments (`code --wait`).
pub fn edit_text(initial_content: &str) -> Result<String> {
    let editor = editor_command();
    let mut words = editor.split_whitespace();
    let Some(program) = words.next() else {
        bail!("$EDITOR is blank. Set it or pass --content.");
    };

    let mut file = tempfile::Builder::new()
        .prefix("sharednotes_")
        .suffix(".md")
        .tempfile()
        .context("Failed to create temp file")?;
    file.write_all(initial_content.as_bytes())
        .context("Failed to write temp file")?;

    let status = Command::new(program)
        .args(words)
        .arg(file.path())
        .status()
        .with_context(|| format!("Failed to run editor '{}'. Set $EDITOR or pass --content.", editor))?;

    if !status.success() {
        bail!("Editor '{}' exited with {}", editor, status);
    }

    fs::read_to_string(file.path()).context("Failed to read edited note")
}

/// Editor command line from the environment
fn editor_command() -> String {
    ["EDITOR", "VISUAL"]
        .into_iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_EDITOR.to_string())
}

/// Ask a yes/no question; anything but "y"/"yes" is no
///
/// Without a terminal on stdin nothing is asked and the answer is no.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(is_yes(&input))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
