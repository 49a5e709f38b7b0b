use crate::state::{DisplayEntry, DisplayKind};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

fn file_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%S").to_string()
}

pub fn new_conversation_id() -> String {
    format!("conversation_{}", file_timestamp(Utc::now()))
}

/// Writes the visible conversation as plain text. Notices are left out.
pub fn save_transcript(
    entries: &[DisplayEntry],
    dir: &Path,
    conversation_id: Option<&str>,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let prefix = conversation_id.unwrap_or("chat");
    let path = dir.join(format!("{prefix}_{}.txt", file_timestamp(Utc::now())));
    fs::write(&path, render_transcript(entries))?;

    info!(path = %path.display(), entries = entries.len(), "transcript saved");
    Ok(path)
}

pub fn render_transcript(entries: &[DisplayEntry]) -> String {
    entries
        .iter()
        .filter_map(|entry| {
            let label = match entry.kind {
                DisplayKind::User => "User",
                DisplayKind::Assistant => "Assistant",
                DisplayKind::ToolUse | DisplayKind::ToolResult => "Tool Call",
                DisplayKind::Notice => return None,
            };
            Some(format!("{label}: {}\n\n", entry.text))
        })
        .collect()
}
