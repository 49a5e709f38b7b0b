//! Rough token accounting for the context warning.

use crate::state::DisplayEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPressure {
    Ok,
    OverLimit { total: usize, limit: usize },
}

/// Four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn estimate_total_tokens(entries: &[DisplayEntry]) -> usize {
    entries.iter().map(|entry| estimate_tokens(&entry.text)).sum()
}

pub fn context_pressure(total: usize, limit: usize) -> ContextPressure {
    if total > limit {
        ContextPressure::OverLimit { total, limit }
    } else {
        ContextPressure::Ok
    }
}

pub fn pressure_warning(pressure: ContextPressure) -> Option<String> {
    match pressure {
        ContextPressure::Ok => None,
        ContextPressure::OverLimit { total, limit } => Some(format!(
            "Context is large (~{total} tokens, limit {limit}). Consider /summarize or /clear."
        )),
    }
}
