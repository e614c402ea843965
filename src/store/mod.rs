//! Conversation store collaborator.
//!
//! The orchestrator reads the transcript and the trace/anchor index, and
//! writes recovery notes, synthesized tool results and executed tool calls.
//! Implementations must be safe for concurrent calls from tool tasks.

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::continuation::ConversationHistory;
use crate::error::TurnError;
use crate::plan::{ToolArgs, ToolCallRecord};
use crate::types::Role;

/// What a stored message represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    ToolCall,
    ToolResult,
    Elicitation,
    Summary,
}

/// Tool call detail attached to a stored message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredToolCall {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArgs,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider response that requested the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl StoredToolCall {
    pub fn from_record(record: &ToolCallRecord, response_id: Option<&str>) -> Self {
        Self {
            call_id: record.call_id.clone(),
            name: record.name.clone(),
            arguments: record.arguments.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            response_id: response_id.map(str::to_string),
        }
    }
}

/// A transcript message as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<StoredToolCall>,
    pub created_at: DateTime<Utc>,
    /// Removed from the live context by a history-removal call.
    #[serde(default)]
    pub archived: bool,
    /// Transient note (e.g. a recovery notice) that never becomes history.
    #[serde(default)]
    pub interim: bool,
}

impl StoredMessage {
    pub fn new(role: Role, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            turn_id: None,
            role,
            kind,
            content: content.into(),
            tool_call: None,
            created_at: Utc::now(),
            archived: false,
            interim: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageKind::Text, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageKind::Text, content)
    }

    /// Tool result message carrying `record`'s outcome for `call_id`.
    pub fn tool_result(record: &ToolCallRecord, response_id: Option<&str>) -> Self {
        let content = if record.is_error() {
            record.error.clone().unwrap_or_default()
        } else {
            record.result.clone()
        };
        let mut message = Self::new(Role::Tool, MessageKind::ToolResult, content);
        message.tool_call = Some(StoredToolCall::from_record(record, response_id));
        message
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn in_turn(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn interim(mut self) -> Self {
        self.interim = true;
        self
    }

    pub fn is_live(&self) -> bool {
        !self.archived && !self.interim
    }
}

/// One user turn and everything produced while serving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

impl Turn {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }
}

/// Conversation transcript with tool-call detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub conversation_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Transcript {
    pub fn messages(&self) -> impl Iterator<Item = &StoredMessage> {
        self.turns.iter().flat_map(|t| t.messages.iter())
    }

    pub fn message(&self, id: &str) -> Option<&StoredMessage> {
        self.messages().find(|m| m.id == id)
    }

    /// The most recent live user text message, i.e. the request being served.
    pub fn latest_user_message(&self) -> Option<&StoredMessage> {
        self.messages()
            .filter(|m| m.is_live() && m.role == Role::User && m.kind == MessageKind::Text)
            .last()
    }
}

/// Partial update of a stored message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub archived: Option<bool>,
    pub interim: Option<bool>,
    pub content: Option<String>,
}

impl MessagePatch {
    pub fn archive() -> Self {
        Self {
            archived: Some(true),
            ..Self::default()
        }
    }

    pub fn apply(&self, message: &mut StoredMessage) {
        if let Some(archived) = self.archived {
            message.archived = archived;
        }
        if let Some(interim) = self.interim {
            message.interim = interim;
        }
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
    }
}

/// Transcript, message and turn persistence consumed by the orchestrator.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Full transcript including tool-call detail.
    async fn transcript(&self, conversation_id: &str) -> Result<Transcript, TurnError>;

    /// Last anchor and trace index for anchored continuation.
    async fn history(&self, conversation_id: &str) -> Result<ConversationHistory, TurnError>;

    async fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<(), TurnError>;

    async fn patch_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> Result<(), TurnError>;

    /// Persist an executed tool call (request and response).
    async fn record_tool_call(
        &self,
        conversation_id: &str,
        turn_id: Option<&str>,
        call: StoredToolCall,
    ) -> Result<(), TurnError>;
}
