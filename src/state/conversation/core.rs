use super::state::{ConversationState, TOOL_RESULT_PREVIEW_CHARS};
use crate::api::ChatBackend;
use crate::error::ApiError;
use crate::tools::ToolDispatcher;
use crate::types::{Message, ToolCall, ToolDefinition};
use crate::util::truncate_chars;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const SUMMARIZE_INSTRUCTION: &str = "Please provide a concise summary of the entire conversation. Focus on the key points, main topics, and conclusions. Keep it brief and to the point.";
const CANCELLED_MARKER: &str = "Request cancelled by user";
const EMPTY_SUMMARY: &str = "No summary available.";

/// How a user turn ended. Exactly one is produced per `run_turn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Reply(String),
    Cancelled,
    Failed(String),
}

/// Progress events for a front end while a turn is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnUpdate {
    Requesting { round: usize },
    AssistantText(String),
    ToolStarted { id: String, name: String },
    ToolFinished { id: String, name: String, preview: String },
}

enum Phase {
    Requesting { round: usize },
    Executing { calls: Vec<ToolCall>, round: usize },
    Done(TurnOutcome),
}

pub struct ConversationLoop<B> {
    backend: B,
    dispatcher: ToolDispatcher,
    tools: Vec<ToolDefinition>,
    max_tool_rounds: usize,
}

impl<B: ChatBackend> ConversationLoop<B> {
    pub fn new(backend: B, dispatcher: ToolDispatcher, max_tool_rounds: usize) -> Self {
        let tools = dispatcher.catalog();
        Self {
            backend,
            dispatcher,
            tools,
            max_tool_rounds: max_tool_rounds.max(1),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Drives one user input to completion: request, run any tool calls,
    /// request again, until the backend answers without tool calls.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        input: &str,
        cancel: &CancellationToken,
        updates: Option<&mpsc::UnboundedSender<TurnUpdate>>,
    ) -> TurnOutcome {
        state.push_user(input);

        let mut phase = Phase::Requesting { round: 1 };
        loop {
            phase = match phase {
                Phase::Requesting { round } => self.request(state, round, cancel, updates).await,
                Phase::Executing { calls, round } => {
                    self.execute(state, &calls, updates).await;
                    Phase::Requesting { round: round + 1 }
                }
                Phase::Done(outcome) => return outcome,
            };
        }
    }

    async fn request(
        &self,
        state: &mut ConversationState,
        round: usize,
        cancel: &CancellationToken,
        updates: Option<&mpsc::UnboundedSender<TurnUpdate>>,
    ) -> Phase {
        if round > self.max_tool_rounds {
            let reason = format!(
                "stopped after {} requests without a final answer",
                self.max_tool_rounds
            );
            warn!(rounds = self.max_tool_rounds, "tool round limit reached");
            state.push_marker(&format!("Error: {reason}"));
            return Phase::Done(TurnOutcome::Failed(reason));
        }
        if cancel.is_cancelled() {
            return self.cancelled(state);
        }

        emit(updates, TurnUpdate::Requesting { round });
        debug!(round, turns = state.transcript.len(), "requesting assistant turn");

        match self
            .backend
            .request_turn(&state.transcript, &self.tools, cancel)
            .await
        {
            Ok(message) => {
                if !message.content.trim().is_empty() {
                    emit(updates, TurnUpdate::AssistantText(message.content.clone()));
                }
                if message.has_tool_calls() {
                    let calls = message.tool_calls.clone();
                    debug!(round, calls = calls.len(), "assistant requested tools");
                    state.push_assistant(message);
                    Phase::Executing { calls, round }
                } else {
                    let reply = message.content.clone();
                    info!(round, chars = reply.len(), "turn complete");
                    state.push_assistant(message);
                    Phase::Done(TurnOutcome::Reply(reply))
                }
            }
            Err(ApiError::Cancelled) => self.cancelled(state),
            Err(error) => {
                let reason = error.to_string();
                warn!(round, %reason, "backend request failed");
                state.push_marker(&format!("Error: {reason}"));
                Phase::Done(TurnOutcome::Failed(reason))
            }
        }
    }

    fn cancelled(&self, state: &mut ConversationState) -> Phase {
        info!("turn cancelled");
        state.push_marker(CANCELLED_MARKER);
        Phase::Done(TurnOutcome::Cancelled)
    }

    // Tools run one at a time in call order. Cancellation is not checked here;
    // the next request observes it.
    async fn execute(
        &self,
        state: &mut ConversationState,
        calls: &[ToolCall],
        updates: Option<&mpsc::UnboundedSender<TurnUpdate>>,
    ) {
        for call in calls {
            emit(
                updates,
                TurnUpdate::ToolStarted {
                    id: call.id.clone(),
                    name: call.name().to_string(),
                },
            );
            state.push_tool_use(call);

            let result = self.dispatcher.execute(call).await;

            emit(
                updates,
                TurnUpdate::ToolFinished {
                    id: call.id.clone(),
                    name: call.name().to_string(),
                    preview: truncate_chars(&result, TOOL_RESULT_PREVIEW_CHARS),
                },
            );
            state.push_tool_result(call, result);
        }
    }

    /// Replaces the conversation with a backend-written summary. On any
    /// failure the transcript is left as it was.
    pub async fn summarize(
        &self,
        state: &mut ConversationState,
        cancel: &CancellationToken,
    ) -> Result<String, ApiError> {
        let mut request = state.transcript.clone();
        request.push(Message::user(SUMMARIZE_INSTRUCTION));

        let result = if cancel.is_cancelled() {
            Err(ApiError::Cancelled)
        } else {
            self.backend.request_turn(&request, &[], cancel).await
        };

        match result {
            Ok(message) => {
                let summary = if message.content.trim().is_empty() {
                    EMPTY_SUMMARY.to_string()
                } else {
                    message.content
                };
                info!(chars = summary.len(), "conversation summarized");
                state.replace_with_summary(&summary);
                Ok(summary)
            }
            Err(error) => {
                if error.is_cancelled() {
                    info!("summarization cancelled");
                } else {
                    warn!(%error, "summarization failed");
                }
                state.push_notice(format!("Failed to summarize conversation: {error}"));
                Err(error)
            }
        }
    }
}

fn emit(updates: Option<&mpsc::UnboundedSender<TurnUpdate>>, update: TurnUpdate) {
    if let Some(tx) = updates {
        let _ = tx.send(update);
    }
}
