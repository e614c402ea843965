//! Model invocation collaborator.

pub mod retrying;

pub use retrying::RetryingClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::TurnError;
use crate::types::{FinishReason, GenerateRequest, GenerateResponse, ModelEvent, ToolCallChunk};

/// Streamed model events.
pub type ModelEventStream = BoxStream<'static, Result<ModelEvent, TurnError>>;

/// What a model supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_streaming: bool,
    /// Whether requests may resume a stored response by ID.
    pub supports_continuation: bool,
    pub context_length: Option<usize>,
}

/// Core trait implemented by model providers.
///
/// Context overflow must be reported as [`TurnError::ContextLimitExceeded`] or
/// a provider error whose text names the overflow, so the runner can tell it
/// apart from other failures.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider name (e.g., "openai").
    fn name(&self) -> &str;

    fn capabilities(&self, model: &str) -> ModelCapabilities;

    /// Generate a full response.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, TurnError>;

    /// Stream a response. Defaults to replaying [`ModelClient::generate`] as events.
    async fn stream(&self, request: &GenerateRequest) -> Result<ModelEventStream, TurnError> {
        let response = self.generate(request).await?;
        let events = response_events(response).into_iter().map(Ok);
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// The events a streaming transport would have delivered for `response`.
pub fn response_events(response: GenerateResponse) -> Vec<ModelEvent> {
    let mut events = Vec::new();
    let tag = |event: ModelEvent| match &response.response_id {
        Some(id) => event.with_response_id(id.clone()),
        None => event,
    };
    if !response.tool_calls.is_empty() {
        let calls = response
            .tool_calls
            .iter()
            .cloned()
            .map(ToolCallChunk::from)
            .collect();
        events.push(tag(ModelEvent::tool_calls(calls)));
    }
    let mut finish = ModelEvent::finish(
        response.finish_reason.unwrap_or(FinishReason::Stop),
        response.content.clone(),
    );
    finish.usage = Some(response.usage.clone());
    events.push(tag(finish));
    events.push(tag(ModelEvent::done()));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentToolCall, StreamEventType};

    #[test]
    fn response_replays_as_calls_then_finish() {
        let response = GenerateResponse {
            response_id: Some("resp_1".into()),
            content: "done".into(),
            tool_calls: vec![AgentToolCall {
                id: "c1".into(),
                name: "search".into(),
                arguments: serde_json::json!({"q": "x"}),
            }],
            ..Default::default()
        };
        let events = response_events(response);
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                StreamEventType::ToolCallDelta,
                StreamEventType::Finish,
                StreamEventType::Done
            ]
        );
        assert_eq!(events[1].text, "done");
        assert!(events
            .iter()
            .all(|e| e.response_id.as_deref() == Some("resp_1")));
    }
}
