//! Streaming types.

use serde::{Deserialize, Serialize};

use super::generation::FinishReason;
use super::message::AgentToolCall;
use super::usage::Usage;

/// An incremental event delivered by a streaming model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    /// Event type.
    pub event_type: StreamEventType,
    /// Content fragment (text delta, or the fragment attached to a finish event).
    #[serde(default)]
    pub text: String,
    /// Tool calls carried by this event, possibly refining calls already seen by ID.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallChunk>,
    /// Provider response this event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Finish reason (only on the finish event).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Usage (typically only on the final event).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ModelEvent {
    pub fn text_delta(text: impl Into<String>) -> Self {
        Self {
            event_type: StreamEventType::TextDelta,
            text: text.into(),
            tool_calls: Vec::new(),
            response_id: None,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallChunk>) -> Self {
        Self {
            event_type: StreamEventType::ToolCallDelta,
            text: String::new(),
            tool_calls: calls,
            response_id: None,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn finish(reason: FinishReason, text: impl Into<String>) -> Self {
        Self {
            event_type: StreamEventType::Finish,
            text: text.into(),
            tool_calls: Vec::new(),
            response_id: None,
            finish_reason: Some(reason),
            usage: None,
        }
    }

    pub fn done() -> Self {
        Self {
            event_type: StreamEventType::Done,
            text: String::new(),
            tool_calls: Vec::new(),
            response_id: None,
            finish_reason: None,
            usage: None,
        }
    }

    /// Error reported by the provider mid-stream.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            event_type: StreamEventType::Error,
            text: message.into(),
            tool_calls: Vec::new(),
            response_id: None,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn with_response_id(mut self, response_id: impl Into<String>) -> Self {
        self.response_id = Some(response_id.into());
        self
    }
}

/// Type of stream event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// Incremental text content.
    TextDelta,
    /// Tool call being built.
    ToolCallDelta,
    /// Model finished; `text` holds any trailing content fragment.
    Finish,
    /// Stream finished.
    Done,
    /// Error during stream; `text` holds the provider message.
    Error,
}

/// A tool call as delivered by the provider; `id` may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    /// Either a JSON object or a JSON-encoded string.
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ToolCallChunk {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
            arguments,
            reason: None,
        }
    }
}

impl From<AgentToolCall> for ToolCallChunk {
    fn from(call: AgentToolCall) -> Self {
        Self {
            id: (!call.id.is_empty()).then_some(call.id),
            name: call.name,
            arguments: call.arguments,
            reason: None,
        }
    }
}
