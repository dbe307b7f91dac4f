//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use sharednotes_core::{Note, SyncEvent};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single note
    pub fn print_note(&self, note: &Note) {
        match self.format {
            OutputFormat::Human => {
                println!("Title:   {}", note.title);
                println!("Version: {}", note.version);
                println!();
                println!("{}", note.content);
            }
            OutputFormat::Json => print_json(note),
            OutputFormat::Quiet => {
                println!("{}", note.content);
            }
        }
    }

    /// Print a list of notes
    pub fn print_notes(&self, notes: &[Note]) {
        match self.format {
            OutputFormat::Human => {
                if notes.is_empty() {
                    println!("No notes found.");
                    return;
                }
                for note in notes {
                    println!(
                        "{} | v{} | {}",
                        truncate(&note.title, 30),
                        note.version,
                        truncate_line(&note.content, 45)
                    );
                }
                println!("\n{} note(s)", notes.len());
            }
            OutputFormat::Json => print_json(&notes),
            OutputFormat::Quiet => {
                for note in notes {
                    println!("{}", note.title);
                }
            }
        }
    }

    /// Report a background sync event
    ///
    /// Only failures are shown; they go to stderr so piped output stays clean.
    pub fn event(&self, event: &SyncEvent) {
        if self.is_quiet() {
            return;
        }
        match event {
            SyncEvent::FetchFailed { title, error } => {
                eprintln!("⚠ Could not fetch '{}': {}", title, error);
            }
            SyncEvent::PushFailed {
                title,
                version,
                error,
            } => {
                eprintln!(
                    "⚠ Could not push '{}' (version {}): {}",
                    title, version, error
                );
            }
            _ => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to format output: {}", e),
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
