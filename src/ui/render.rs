use crate::state::{DisplayEntry, DisplayKind, TurnUpdate};
use crate::ui::input_metrics::truncate_line;
use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};

pub const HEADER_WIDTH: usize = 76;

pub fn header_line(api_base_url: &str, context_limit: usize) -> String {
    truncate_line(
        &format!("Connected to: {api_base_url} | Context: {context_limit} tokens"),
        HEADER_WIDTH,
    )
}

fn label(kind: DisplayKind) -> (&'static str, Color) {
    match kind {
        DisplayKind::User => ("User: ", Color::Blue),
        DisplayKind::Assistant => ("Assistant: ", Color::Green),
        DisplayKind::ToolUse => ("Tool: ", Color::Yellow),
        DisplayKind::ToolResult => ("Tool result: ", Color::Yellow),
        DisplayKind::Notice => ("", Color::DarkGrey),
    }
}

/// Repaints the whole conversation. `clear` is off in debug mode so log
/// output stays visible.
pub fn redraw<W: Write>(
    out: &mut W,
    header: &str,
    entries: &[DisplayEntry],
    clear: bool,
) -> io::Result<()> {
    if clear {
        queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
    }
    queue!(
        out,
        SetAttribute(Attribute::Bold),
        Print(header),
        SetAttribute(Attribute::Reset),
        Print("\n\n")
    )?;
    for entry in entries {
        write_entry(out, entry, "\n")?;
    }
    out.flush()
}

/// Writes one entry. Raw mode needs `"\r\n"` as the line break.
pub fn write_entry<W: Write>(out: &mut W, entry: &DisplayEntry, newline: &str) -> io::Result<()> {
    let (label, color) = label(entry.kind);
    let text = if newline == "\n" {
        entry.text.clone()
    } else {
        entry.text.replace('\n', newline)
    };
    queue!(
        out,
        SetForegroundColor(color),
        Print(label),
        ResetColor,
        Print(text),
        Print(newline)
    )
}

/// Live line for a progress event, if it deserves one.
pub fn progress_entry(update: &TurnUpdate) -> Option<DisplayEntry> {
    match update {
        TurnUpdate::Requesting { round: 1 } => Some(DisplayEntry::new(
            DisplayKind::Notice,
            "AI is thinking... (Press ESC to cancel)",
        )),
        TurnUpdate::Requesting { .. } => None,
        TurnUpdate::AssistantText(text) => {
            Some(DisplayEntry::new(DisplayKind::Assistant, text.clone()))
        }
        TurnUpdate::ToolStarted { name, .. } => Some(DisplayEntry::new(
            DisplayKind::ToolUse,
            format!("Using tool: {name}"),
        )),
        TurnUpdate::ToolFinished { preview, .. } => {
            Some(DisplayEntry::new(DisplayKind::ToolResult, preview.clone()))
        }
    }
}

pub fn write_prompt<W: Write>(out: &mut W, warning: Option<&str>) -> io::Result<()> {
    if let Some(warning) = warning {
        queue!(
            out,
            SetForegroundColor(Color::Yellow),
            Print(warning),
            ResetColor,
            Print("\n")
        )?;
    }
    queue!(out, SetForegroundColor(Color::Cyan), Print("> "), ResetColor)?;
    out.flush()
}
