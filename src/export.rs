//! Export a conversation as a plain-text transcript.
//!
//! Each turn becomes two lines, `User: <question>` and `Bot: <answer>`,
//! in conversation order. Multi-line answers are written as-is.

use anyhow::Result;
use std::path::Path;

use crate::models::ConversationTurn;

/// Render the transcript of `history`.
pub fn render_transcript(history: &[ConversationTurn]) -> String {
    let mut out = String::new();
    for turn in history {
        out.push_str("User: ");
        out.push_str(&turn.question);
        out.push('\n');
        out.push_str("Bot: ");
        out.push_str(&turn.answer);
        out.push('\n');
    }
    out
}

/// Write the transcript of `history`.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn run_export(history: &[ConversationTurn], output: Option<&Path>) -> Result<()> {
    let transcript = render_transcript(history);

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &transcript)?;
            eprintln!("Exported {} turns to {}", history.len(), path.display());
        }
        None => {
            print!("{}", transcript);
        }
    }
    Ok(())
}
