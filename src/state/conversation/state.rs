use crate::types::{Message, Role, ToolCall};
use crate::util::truncate_chars;

pub const TOOL_RESULT_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Notice,
}

/// What the user sees for one event. May abbreviate the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEntry {
    pub kind: DisplayKind,
    pub text: String,
}

impl DisplayEntry {
    pub fn new(kind: DisplayKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn tool_use(call: &ToolCall) -> Self {
        Self::new(DisplayKind::ToolUse, format!("Using tool: {}", call.name()))
    }

    pub fn tool_result(content: &str) -> Self {
        Self::new(
            DisplayKind::ToolResult,
            truncate_chars(content, TOOL_RESULT_PREVIEW_CHARS),
        )
    }
}

/// The transcript sent to the backend plus the parallel display sequence.
///
/// The transcript always starts with exactly one system turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub(super) transcript: Vec<Message>,
    pub(super) display: Vec<DisplayEntry>,
}

impl ConversationState {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            transcript: vec![Message::system(system_prompt)],
            display: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn display(&self) -> &[DisplayEntry] {
        &self.display
    }

    pub fn system_prompt(&self) -> &str {
        self.transcript
            .first()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }

    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.display
            .push(DisplayEntry::new(DisplayKind::Notice, text));
    }

    /// Empties the display and drops every turn after the system prompt.
    pub fn reset(&mut self) {
        self.transcript.truncate(1);
        self.display.clear();
    }

    pub(super) fn push_user(&mut self, text: &str) {
        self.transcript.push(Message::user(text));
        self.display
            .push(DisplayEntry::new(DisplayKind::User, text));
    }

    /// Appends an assistant turn as received; its visible text, if any, is
    /// mirrored to the display.
    pub(super) fn push_assistant(&mut self, message: Message) {
        if !message.content.trim().is_empty() {
            self.display.push(DisplayEntry::new(
                DisplayKind::Assistant,
                message.content.clone(),
            ));
        }
        self.transcript.push(message);
    }

    pub(super) fn push_tool_result(&mut self, call: &ToolCall, content: String) {
        self.display.push(DisplayEntry::tool_result(&content));
        self.transcript.push(Message::tool(call.id.clone(), content));
    }

    pub(super) fn push_tool_use(&mut self, call: &ToolCall) {
        self.display.push(DisplayEntry::tool_use(call));
    }

    /// Records how a turn ended without a reply: an assistant turn in the
    /// transcript and a notice on screen.
    pub(super) fn push_marker(&mut self, text: &str) {
        self.transcript.push(Message::assistant(text));
        self.push_notice(text);
    }

    pub(super) fn replace_with_summary(&mut self, summary: &str) {
        self.transcript.truncate(1);
        self.transcript.push(Message::assistant(summary));
        self.display = vec![
            DisplayEntry::new(DisplayKind::Assistant, summary),
            DisplayEntry::new(DisplayKind::Notice, "Conversation summarized successfully."),
        ];
    }
}
