use crate::types::Message;
use serde::Serialize;
use tracing::{debug, enabled, Level};

const PAYLOAD_TARGET: &str = "spectre::api::payload";

pub fn debug_payload_enabled() -> bool {
    enabled!(target: PAYLOAD_TARGET, Level::DEBUG)
}

pub fn emit_debug_payload<T: Serialize>(label: &str, url: &str, payload: &T) {
    if !debug_payload_enabled() {
        return;
    }
    let formatted = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    debug!(target: PAYLOAD_TARGET, %url, "{label}\n{formatted}");
}

pub fn emit_history_summary(transcript: &[Message], sent: usize) {
    debug!(
        target: PAYLOAD_TARGET,
        total = transcript.len(),
        sent,
        dropped = transcript.len().saturating_sub(sent),
        "message history"
    );
}
