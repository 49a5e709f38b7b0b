mod core;
mod state;

#[cfg(test)]
mod tests;

pub use self::core::{ConversationLoop, TurnOutcome, TurnUpdate, SUMMARIZE_INSTRUCTION};
pub use self::state::{ConversationState, DisplayEntry, DisplayKind, TOOL_RESULT_PREVIEW_CHARS};
