//! Shared test helpers: scripted model client, recording registry, failing store.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use turnwise::continuation::ConversationHistory;
use turnwise::error::TurnError;
use turnwise::events::{TurnEvent, TurnEventSink};
use turnwise::plan::ToolArgs;
use turnwise::provider::{response_events, ModelCapabilities, ModelClient, ModelEventStream};
use turnwise::store::{
    ConversationStore, InMemoryStore, MessagePatch, StoredMessage, StoredToolCall, Transcript,
};
use turnwise::tools::{AgentTool, AgentToolParameters, ToolExecutionContext, ToolRegistry, ToolSet};
use turnwise::types::*;

/// One scripted model call.
pub enum Scenario {
    /// Streamed events, delivered in order.
    Events(Vec<ModelEvent>),
    /// A complete response.
    Response(GenerateResponse),
    Fail(TurnError),
}

/// Model client answering from a queue of scenarios and recording every request.
pub struct ScriptedClient {
    capabilities: ModelCapabilities,
    scenarios: Mutex<VecDeque<Scenario>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedClient {
    pub fn streaming() -> Self {
        Self::with_capabilities(ModelCapabilities {
            supports_streaming: true,
            supports_continuation: false,
            context_length: Some(8000),
        })
    }

    pub fn blocking() -> Self {
        Self::with_capabilities(ModelCapabilities {
            supports_streaming: false,
            supports_continuation: false,
            context_length: Some(8000),
        })
    }

    pub fn with_capabilities(capabilities: ModelCapabilities) -> Self {
        Self {
            capabilities,
            scenarios: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, scenario: Scenario) -> &Self {
        self.scenarios.lock().unwrap().push_back(scenario);
        self
    }

    pub fn push_events(&self, events: Vec<ModelEvent>) -> &Self {
        self.push(Scenario::Events(events))
    }

    pub fn push_text(&self, text: &str) -> &Self {
        self.push(Scenario::Events(vec![
            ModelEvent::text_delta(text),
            ModelEvent::finish(FinishReason::Stop, ""),
            ModelEvent::done(),
        ]))
    }

    pub fn push_overflow(&self, message: &str) -> &Self {
        self.push(Scenario::Fail(TurnError::context_limit(message)))
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &GenerateRequest) -> Scenario {
        self.requests.lock().unwrap().push(request.clone());
        self.scenarios
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Scenario::Response(GenerateResponse {
                    content: "done".to_string(),
                    finish_reason: Some(FinishReason::Stop),
                    ..Default::default()
                })
            })
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self, _model: &str) -> ModelCapabilities {
        self.capabilities
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, TurnError> {
        match self.next(request) {
            Scenario::Response(response) => Ok(response),
            Scenario::Fail(error) => Err(error),
            Scenario::Events(events) => {
                let mut response = GenerateResponse::default();
                for event in events {
                    response.content.push_str(&event.text);
                    response.response_id = event.response_id.or(response.response_id);
                    response.tool_calls.extend(event.tool_calls.into_iter().map(|c| AgentToolCall {
                        id: c.id.unwrap_or_default(),
                        name: c.name,
                        arguments: c.arguments,
                    }));
                }
                Ok(response)
            }
        }
    }

    async fn stream(&self, request: &GenerateRequest) -> Result<ModelEventStream, TurnError> {
        let events = match self.next(request) {
            Scenario::Events(events) => events,
            Scenario::Response(response) => response_events(response),
            Scenario::Fail(error) => return Err(error),
        };
        let stream = async_stream::stream! {
            for event in events {
                tokio::task::yield_now().await;
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Registry that records every executed call before delegating to a [`ToolSet`].
pub struct RecordingRegistry {
    inner: ToolSet,
    calls: Mutex<Vec<(String, ToolArgs)>>,
}

impl RecordingRegistry {
    pub fn new(inner: ToolSet) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, ToolArgs)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|(n, _)| n == name).count()
    }
}

#[async_trait]
impl ToolRegistry for RecordingRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.inner.definitions()
    }

    async fn execute(
        &self,
        name: &str,
        args: &ToolArgs,
        ctx: &ToolExecutionContext,
    ) -> Result<String, TurnError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        self.inner.execute(name, args, ctx).await
    }
}

/// `search` tool answering `results for <q>`.
pub fn search_tool() -> AgentTool {
    AgentTool::new(
        "search",
        "Search the index",
        AgentToolParameters::object()
            .string("q", "Query", true)
            .build(),
        |args, _ctx| async move {
            let q = args.get_str("q").map(str::to_string);
            q.map(|q| serde_json::json!(format!("results for {q}")))
        },
    )
}

/// Tool that always fails.
pub fn broken_tool() -> AgentTool {
    AgentTool::new("broken", "Always fails", AgentToolParameters::empty(), |_args, _ctx| async {
        Err(TurnError::ToolExecution {
            tool_name: "broken".into(),
            message: "disk on fire".into(),
        })
    })
}

/// Store whose tool-call persistence always fails.
pub struct FailingStore {
    pub inner: InMemoryStore,
}

#[async_trait]
impl ConversationStore for FailingStore {
    async fn transcript(&self, conversation_id: &str) -> Result<Transcript, TurnError> {
        self.inner.transcript(conversation_id).await
    }

    async fn history(&self, conversation_id: &str) -> Result<ConversationHistory, TurnError> {
        self.inner.history(conversation_id).await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<(), TurnError> {
        self.inner.append_message(conversation_id, message).await
    }

    async fn patch_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> Result<(), TurnError> {
        self.inner
            .patch_message(conversation_id, message_id, patch)
            .await
    }

    async fn record_tool_call(
        &self,
        _conversation_id: &str,
        _turn_id: Option<&str>,
        call: StoredToolCall,
    ) -> Result<(), TurnError> {
        Err(TurnError::Store(format!("write refused for {}", call.call_id)))
    }
}

/// Event sink collecting everything emitted.
pub fn collecting_sink() -> (TurnEventSink, Arc<Mutex<Vec<TurnEvent>>>) {
    let events: Arc<Mutex<Vec<TurnEvent>>> = Arc::default();
    let sink_events = Arc::clone(&events);
    let sink: TurnEventSink = Arc::new(move |event| sink_events.lock().unwrap().push(event));
    (sink, events)
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ModelEvent {
    ModelEvent::tool_calls(vec![ToolCallChunk::new(id, name, args)])
}

pub fn input(messages: Vec<ModelMessage>, tools: Vec<ToolDefinition>) -> GenerateInput {
    GenerateInput::builder()
        .conversation_id("conv")
        .turn_id("t2")
        .model("test-model")
        .system_prompt("You are a careful research assistant.")
        .messages(messages)
        .tools(tools)
        .build()
}
