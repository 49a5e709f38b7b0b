use super::logging::{emit_debug_payload, emit_history_summary};
use super::ChatBackend;
use crate::config::Config;
use crate::error::ApiError;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, Message, ToolDefinition};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
struct Sampling {
    max_tokens: u32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    model: String,
    chat_url: String,
    models_url: String,
    sampling: Sampling,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            model: config.model.clone(),
            chat_url: config.chat_completions_url(),
            models_url: config.models_url(),
            sampling: Sampling {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                top_k: config.top_k,
                top_p: config.top_p,
                repeat_penalty: config.repeat_penalty,
            },
        }
    }

    /// Liveness check against the model listing endpoint.
    pub async fn probe(&self) -> Result<(), ApiError> {
        let unreachable = |message: String| ApiError::Unreachable {
            url: self.models_url.clone(),
            message,
        };

        let response = self
            .http
            .get(&self.models_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|error| unreachable(error.to_string()))?;
        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP {}", response.status())));
        }
        debug!(url = %self.models_url, "backend reachable");
        Ok(())
    }

    fn build_request<'a>(
        &'a self,
        transcript: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> ChatCompletionRequest<'a> {
        let messages = transmittable(transcript);
        emit_history_summary(transcript, messages.len());
        ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.sampling.max_tokens,
            temperature: self.sampling.temperature,
            top_k: self.sampling.top_k,
            top_p: self.sampling.top_p,
            repeat_penalty: self.sampling.repeat_penalty,
            stream: false,
            tools,
            tool_choice: (!tools.is_empty()).then_some("auto"),
        }
    }

    async fn send(&self, body: &ChatCompletionRequest<'_>) -> Result<Message, ApiError> {
        emit_debug_payload("chat completion request", &self.chat_url, body);

        let response = self
            .http
            .post(&self.chat_url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|error| map_request_error(error, &self.chat_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.chat_url, status = status.as_u16(), "backend returned error status");
            return Err(ApiError::Status {
                url: self.chat_url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|error| ApiError::InvalidResponse(error.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::InvalidResponse("response contained no choices".to_string()))?;

        emit_debug_payload("chat completion response", &self.chat_url, &choice.message);
        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("<none>"),
            tool_calls = choice.message.tool_calls.len(),
            "assistant turn received"
        );
        Ok(choice.message)
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn request_turn(
        &self,
        transcript: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Message, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let body = self.build_request(transcript, tools);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(url = %self.chat_url, "request cancelled");
                Err(ApiError::Cancelled)
            }
            result = self.send(&body) => result,
        }
    }
}

/// Turns the backend accepts: blank turns are dropped unless they are
/// assistant turns carrying tool calls.
pub fn transmittable(transcript: &[Message]) -> Vec<&Message> {
    transcript
        .iter()
        .filter(|message| message.is_transmittable())
        .collect()
}

fn map_request_error(error: reqwest::Error, url: &str) -> ApiError {
    if error.is_connect() {
        return ApiError::Unreachable {
            url: url.to_string(),
            message: error.to_string(),
        };
    }
    if error.is_timeout() {
        return ApiError::Network {
            url: url.to_string(),
            message: format!("timed out: {error}"),
        };
    }
    if let Some(status) = error.status() {
        return ApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: error.to_string(),
        };
    }
    ApiError::Network {
        url: url.to_string(),
        message: error.to_string(),
    }
}
