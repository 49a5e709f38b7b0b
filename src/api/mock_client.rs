use super::ChatBackend;
use crate::error::ApiError;
use crate::types::{Message, ToolDefinition};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Message(Message),
    Fail(ApiError),
    /// Blocks until the request's token fires, then reports cancellation.
    HangUntilCancelled,
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    transcripts: Vec<Vec<Message>>,
    offered_tools: Vec<usize>,
}

/// Backend that replays queued replies and records what it was sent.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: replies.into_iter().collect(),
                ..Script::default()
            })),
        }
    }

    pub fn request_count(&self) -> usize {
        self.lock().transcripts.len()
    }

    /// Every transcript received, in request order.
    pub fn recorded_transcripts(&self) -> Vec<Vec<Message>> {
        self.lock().transcripts.clone()
    }

    /// Number of tool definitions offered with each request.
    pub fn offered_tool_counts(&self) -> Vec<usize> {
        self.lock().offered_tools.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn request_turn(
        &self,
        transcript: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Message, ApiError> {
        let next = {
            let mut script = self.lock();
            script.transcripts.push(transcript.to_vec());
            script.offered_tools.push(tools.len());
            script.replies.pop_front()
        };

        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        match next {
            Some(ScriptedReply::Message(message)) => Ok(message),
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::HangUntilCancelled) => {
                cancel.cancelled().await;
                Err(ApiError::Cancelled)
            }
            None => Err(ApiError::InvalidResponse(
                "ScriptedBackend: no more responses configured".to_string(),
            )),
        }
    }
}
