use super::workspace::Workspace;
use crate::error::ToolError;
use std::fmt::Write as _;
use std::fs;

pub const DEFAULT_CONTEXT_LINES: usize = 500;

/// Numbered window around `line_number`, with the target line marked `>>>`.
pub fn code_context(
    workspace: &Workspace,
    file: &str,
    line_number: usize,
    context_lines: Option<usize>,
) -> Result<String, ToolError> {
    let path = workspace.resolve(file)?;
    if !path.is_file() {
        return Err(ToolError::Failed(format!("File \"{file}\" not found.")));
    }

    let content = fs::read_to_string(&path)
        .map_err(|error| ToolError::Failed(format!("Error reading file context: {error}")))?;
    let lines: Vec<&str> = content.split('\n').collect();

    if line_number < 1 || line_number > lines.len() {
        return Err(ToolError::Failed(format!(
            "Invalid line number {line_number}. File has {} lines.",
            lines.len()
        )));
    }

    let radius = context_lines.unwrap_or(DEFAULT_CONTEXT_LINES);
    let start = line_number.saturating_sub(radius).max(1);
    let end = line_number.saturating_add(radius).min(lines.len());

    let mut output = format!("{file} (lines {start}-{end}):\n\n");
    for (index, line) in lines.iter().enumerate().take(end).skip(start - 1) {
        let current = index + 1;
        let marker = if current == line_number { ">>>" } else { "   " };
        let _ = writeln!(output, "{marker} {current:>4}: {line}");
    }
    Ok(output)
}
