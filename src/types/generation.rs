//! Round inputs and outputs exchanged with the model collaborator.

use std::collections::HashSet;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::message::{AgentToolCall, ModelMessage, Role};
use super::usage::Usage;
use crate::plan::ToolCallRecord;

/// Settings controlling text generation.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    pub parallel_tool_calls: Option<bool>,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn byte_len(&self) -> usize {
        self.name.len()
            + self.description.len()
            + serde_json::to_string(&self.parameters)
                .map(|s| s.len())
                .unwrap_or(0)
    }
}

/// Fully rendered input for one round, supplied by the binding builder.
#[derive(Debug, Clone, Builder, Default)]
pub struct GenerateInput {
    #[builder(into)]
    pub conversation_id: String,
    /// The in-flight turn; messages tagged with another turn are committed history.
    #[builder(into)]
    pub turn_id: Option<String>,
    #[builder(into)]
    pub model: String,
    #[builder(into)]
    pub system_prompt: Option<String>,
    #[builder(default)]
    pub system_documents: Vec<String>,
    #[builder(default)]
    pub messages: Vec<ModelMessage>,
    #[builder(default)]
    pub tools: Vec<ToolDefinition>,
    /// Tool results already produced earlier in this turn; seeds duplicate detection.
    #[builder(default)]
    pub prior_tool_calls: Vec<ToolCallRecord>,
    #[builder(default)]
    pub settings: GenerationSettings,
}

impl GenerateInput {
    /// Flatten into the request sent to the provider.
    pub fn to_request(&self) -> GenerateRequest {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            messages.push(ModelMessage::system(prompt));
        }
        for document in &self.system_documents {
            messages.push(ModelMessage::system(document.clone()));
        }
        messages.extend(self.messages.iter().cloned());
        GenerateRequest {
            model: self.model.clone(),
            messages,
            tools: self.tools.clone(),
            settings: self.settings.clone(),
            previous_response_id: None,
        }
    }

    /// Bytes of system-role content carried by this input.
    pub fn system_bytes(&self) -> usize {
        self.system_prompt.as_deref().map(str::len).unwrap_or(0)
            + self.system_documents.iter().map(String::len).sum::<usize>()
            + self
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(ModelMessage::content_bytes)
                .sum::<usize>()
    }

    /// A copy of this input with all system-role content removed.
    pub fn without_system_content(&self) -> Self {
        let mut stripped = self.clone();
        stripped.system_prompt = None;
        stripped.system_documents.clear();
        stripped.messages.retain(|m| m.role != Role::System);
        stripped
    }

    /// A copy of this input without the messages whose IDs are listed.
    pub fn without_messages(&self, ids: &HashSet<String>) -> Self {
        let mut pruned = self.clone();
        pruned
            .messages
            .retain(|m| m.id.as_ref().map_or(true, |id| !ids.contains(id)));
        pruned
    }
}

/// A request sent to a model provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
    pub settings: GenerationSettings,
    /// Set when the request is a delta against a stored provider response.
    pub previous_response_id: Option<String>,
}

impl GenerateRequest {
    /// Content bytes of messages plus tool definitions.
    pub fn content_bytes(&self) -> usize {
        self.messages
            .iter()
            .map(ModelMessage::content_bytes)
            .sum::<usize>()
            + self.tools.iter().map(ToolDefinition::byte_len).sum::<usize>()
    }
}

/// Response from a blocking generate call.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub response_id: Option<String>,
    pub content: String,
    pub tool_calls: Vec<AgentToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
}

/// Accumulated output of a round.
#[derive(Debug, Clone, Default)]
pub struct GenerateOutput {
    /// Text accumulated from content deltas and finish fragments.
    pub content: String,
    pub response_id: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    /// Outcome of every tool step dispatched during the round.
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}
