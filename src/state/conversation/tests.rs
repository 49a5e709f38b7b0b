use super::*;
use crate::api::{ChatBackend, ScriptedBackend, ScriptedReply};
use crate::error::ApiError;
use crate::tools::ToolDispatcher;
use crate::types::{Message, Role, ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn dispatcher(temp: &TempDir) -> ToolDispatcher {
    ToolDispatcher::new(temp.path().to_path_buf(), temp.path().join(".backups"))
}

fn tool_reply(id: &str, name: &str, arguments: serde_json::Value) -> ScriptedReply {
    ScriptedReply::Message(Message::assistant_with_tools(
        "",
        vec![ToolCall::new(id, name, &arguments)],
    ))
}

fn text_reply(text: &str) -> ScriptedReply {
    ScriptedReply::Message(Message::assistant(text))
}

#[tokio::test]
async fn test_two_tool_rounds_then_text() {
    let temp = TempDir::new().expect("temp dir");
    fs::write(temp.path().join("main.rs"), "fn main() {\n    run();\n}\n").unwrap();
    let backend = ScriptedBackend::new([
        tool_reply("call_a", "search_codebase", json!({"query": "run"})),
        tool_reply(
            "call_b",
            "get_code_context",
            json!({"file": "main.rs", "lineNumber": 2, "contextLines": 1}),
        ),
        text_reply("run() is called from main."),
    ]);
    let conversation = ConversationLoop::new(backend.clone(), dispatcher(&temp), 25);
    let mut state = ConversationState::new("system prompt");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = conversation
        .run_turn(&mut state, "where is run?", &CancellationToken::new(), Some(&tx))
        .await;

    assert_eq!(
        outcome,
        TurnOutcome::Reply("run() is called from main.".to_string())
    );

    let roles: Vec<Role> = state.transcript().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
        ]
    );
    let tool_turns: Vec<&Message> = state
        .transcript()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_turns.len(), 2);
    assert_eq!(tool_turns[0].tool_call_id.as_deref(), Some("call_a"));
    assert_eq!(tool_turns[1].tool_call_id.as_deref(), Some("call_b"));
    assert_eq!(state.transcript()[2].tool_calls[0].id, "call_a");
    assert_eq!(state.transcript()[4].tool_calls[0].id, "call_b");
    assert!(tool_turns[1].content.contains(">>>    2:     run();"));

    assert_eq!(backend.request_count(), 3);
    assert_eq!(backend.offered_tool_counts(), vec![5, 5, 5]);
    // The third request sees both results.
    assert_eq!(backend.recorded_transcripts()[2].len(), 6);

    drop(tx);
    let mut started = Vec::new();
    while let Some(update) = rx.recv().await {
        if let TurnUpdate::ToolStarted { id, .. } = update {
            started.push(id);
        }
    }
    assert_eq!(started, vec!["call_a", "call_b"]);
}

#[tokio::test]
async fn test_visible_text_alongside_tool_calls_is_surfaced() {
    let temp = TempDir::new().expect("temp dir");
    let backend = ScriptedBackend::new([
        ScriptedReply::Message(Message::assistant_with_tools(
            "Let me look around.",
            vec![ToolCall::new("c1", "get_directory_structure", &json!({}))],
        )),
        text_reply("Done."),
    ]);
    let conversation = ConversationLoop::new(backend, dispatcher(&temp), 25);
    let mut state = ConversationState::new("sys");

    conversation
        .run_turn(&mut state, "look", &CancellationToken::new(), None)
        .await;

    let kinds: Vec<DisplayKind> = state.display().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DisplayKind::User,
            DisplayKind::Assistant,
            DisplayKind::ToolUse,
            DisplayKind::ToolResult,
            DisplayKind::Assistant,
        ]
    );
    assert_eq!(state.display()[1].text, "Let me look around.");
}

#[tokio::test]
async fn test_cancel_during_request_adds_exactly_one_turn() {
    let temp = TempDir::new().expect("temp dir");
    let backend = ScriptedBackend::new([text_reply("first answer"), ScriptedReply::HangUntilCancelled]);
    let conversation = ConversationLoop::new(backend, dispatcher(&temp), 25);
    let mut state = ConversationState::new("sys");
    conversation
        .run_turn(&mut state, "first", &CancellationToken::new(), None)
        .await;
    assert_eq!(state.transcript().len(), 3);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let outcome = conversation
        .run_turn(&mut state, "second", &cancel, None)
        .await;

    assert_eq!(outcome, TurnOutcome::Cancelled);
    // system, user, assistant, user, then the marker.
    assert_eq!(state.transcript().len(), 5);
    let marker = &state.transcript()[4];
    assert_eq!(marker.role, Role::Assistant);
    assert_eq!(marker.content, "Request cancelled by user");
    let last = state.display().last().expect("notice");
    assert_eq!(last.kind, DisplayKind::Notice);
}

/// Fires the token while handing back a tool call, so cancellation arrives
/// during tool execution.
struct CancelOnToolCall {
    inner: ScriptedBackend,
}

#[async_trait]
impl ChatBackend for CancelOnToolCall {
    async fn request_turn(
        &self,
        transcript: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Message, ApiError> {
        let reply = self.inner.request_turn(transcript, tools, cancel).await?;
        if reply.has_tool_calls() {
            cancel.cancel();
        }
        Ok(reply)
    }
}

#[tokio::test]
async fn test_cancel_during_tool_execution_lets_tool_finish() {
    let temp = TempDir::new().expect("temp dir");
    fs::write(temp.path().join("a.txt"), "old\n").unwrap();
    let backend = CancelOnToolCall {
        inner: ScriptedBackend::new([
            tool_reply(
                "patch_1",
                "patch_file",
                json!({"file": "a.txt", "changes": [{"action": "replace", "lineStart": 1, "content": "new"}]}),
            ),
            text_reply("never requested"),
        ]),
    };
    let conversation = ConversationLoop::new(backend, dispatcher(&temp), 25);
    let mut state = ConversationState::new("sys");

    let outcome = conversation
        .run_turn(&mut state, "patch it", &CancellationToken::new(), None)
        .await;

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(fs::read_to_string(temp.path().join("a.txt")).unwrap(), "new\n");
    let roles: Vec<Role> = state.transcript().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(conversation.backend().inner.request_count(), 1);
}

#[tokio::test]
async fn test_backend_failure_appends_error_turn() {
    let temp = TempDir::new().expect("temp dir");
    let backend = ScriptedBackend::new([ScriptedReply::Fail(ApiError::Status {
        url: "http://localhost:8080/v1/chat/completions".to_string(),
        status: 500,
        body: "boom".to_string(),
    })]);
    let conversation = ConversationLoop::new(backend, dispatcher(&temp), 25);
    let mut state = ConversationState::new("sys");

    let outcome = conversation
        .run_turn(&mut state, "hi", &CancellationToken::new(), None)
        .await;

    let TurnOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.contains("HTTP 500"));
    assert_eq!(state.transcript().len(), 3);
    assert_eq!(state.transcript()[2].content, format!("Error: {reason}"));
    assert_eq!(state.display().last().unwrap().kind, DisplayKind::Notice);
}

#[tokio::test]
async fn test_round_guard_stops_endless_tool_calls() {
    let temp = TempDir::new().expect("temp dir");
    let backend = ScriptedBackend::new((0..5).map(|n| {
        tool_reply(&format!("c{n}"), "get_directory_structure", json!({}))
    }));
    let conversation = ConversationLoop::new(backend.clone(), dispatcher(&temp), 2);
    let mut state = ConversationState::new("sys");

    let outcome = conversation
        .run_turn(&mut state, "loop forever", &CancellationToken::new(), None)
        .await;

    assert!(matches!(outcome, TurnOutcome::Failed(_)));
    assert_eq!(backend.request_count(), 2);
    let last = state.transcript().last().unwrap();
    assert!(last.content.starts_with("Error: stopped after 2 requests"));
}

#[tokio::test]
async fn test_unknown_tool_result_is_still_paired() {
    let temp = TempDir::new().expect("temp dir");
    let backend = ScriptedBackend::new([
        tool_reply("x1", "delete_everything", json!({})),
        text_reply("ok"),
    ]);
    let conversation = ConversationLoop::new(backend, dispatcher(&temp), 25);
    let mut state = ConversationState::new("sys");

    conversation
        .run_turn(&mut state, "go", &CancellationToken::new(), None)
        .await;

    let tool_turn = &state.transcript()[3];
    assert_eq!(tool_turn.tool_call_id.as_deref(), Some("x1"));
    assert_eq!(tool_turn.content, "Error: Unknown tool: delete_everything");
}

#[tokio::test]
async fn test_summarize_replaces_conversation() {
    let temp = TempDir::new().expect("temp dir");
    let backend = ScriptedBackend::new([text_reply("answer"), text_reply("We discussed X.")]);
    let conversation = ConversationLoop::new(backend.clone(), dispatcher(&temp), 25);
    let mut state = ConversationState::new("sys");
    conversation
        .run_turn(&mut state, "question", &CancellationToken::new(), None)
        .await;

    let summary = conversation
        .summarize(&mut state, &CancellationToken::new())
        .await
        .expect("summary");

    assert_eq!(summary, "We discussed X.");
    assert_eq!(
        state.transcript(),
        &[Message::system("sys"), Message::assistant("We discussed X.")]
    );
    assert_eq!(
        state.display(),
        &[
            DisplayEntry::new(DisplayKind::Assistant, "We discussed X."),
            DisplayEntry::new(DisplayKind::Notice, "Conversation summarized successfully."),
        ]
    );

    let sent = &backend.recorded_transcripts()[1];
    assert_eq!(sent.last().unwrap().content, SUMMARIZE_INSTRUCTION);
    assert_eq!(backend.offered_tool_counts()[1], 0);
}

#[tokio::test]
async fn test_failed_summarize_leaves_transcript_untouched() {
    let temp = TempDir::new().expect("temp dir");
    let backend = ScriptedBackend::new([
        text_reply("answer"),
        ScriptedReply::Fail(ApiError::Network {
            url: "http://localhost:8080".to_string(),
            message: "reset".to_string(),
        }),
    ]);
    let conversation = ConversationLoop::new(backend, dispatcher(&temp), 25);
    let mut state = ConversationState::new("sys");
    conversation
        .run_turn(&mut state, "question", &CancellationToken::new(), None)
        .await;
    let before = state.transcript().to_vec();
    let display_before = state.display().len();

    assert!(conversation
        .summarize(&mut state, &CancellationToken::new())
        .await
        .is_err());

    assert_eq!(state.transcript(), before.as_slice());
    assert_eq!(state.display().len(), display_before + 1);
    assert_eq!(state.display().last().unwrap().kind, DisplayKind::Notice);
}

#[test]
fn test_reset_keeps_only_system_turn() {
    let mut state = ConversationState::new("sys");
    state.push_user("hello");
    state.push_marker("Request cancelled by user");

    state.reset();

    assert_eq!(state.transcript(), &[Message::system("sys")]);
    assert!(state.display().is_empty());
    assert_eq!(state.system_prompt(), "sys");
}

#[test]
fn test_tool_result_display_is_truncated() {
    let long = "x".repeat(400);
    let entry = DisplayEntry::tool_result(&long);
    assert_eq!(entry.text.chars().count(), TOOL_RESULT_PREVIEW_CHARS + 3);
    assert!(entry.text.ends_with("..."));
}
