pub mod client;
pub mod logging;
pub mod mock_client;

pub use client::ApiClient;
pub use mock_client::{ScriptedBackend, ScriptedReply};

use crate::error::ApiError;
use crate::types::{Message, ToolDefinition};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One request/response exchange with a chat-completions backend.
///
/// Implementations must return `ApiError::Cancelled` promptly once `cancel`
/// fires and must never panic on malformed responses.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn request_turn(
        &self,
        transcript: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Message, ApiError>;
}
