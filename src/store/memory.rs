//! Process-local conversation store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    ConversationStore, MessageKind, MessagePatch, StoredMessage, StoredToolCall, Transcript, Turn,
};
use crate::continuation::{Anchor, ConversationHistory, Trace};
use crate::error::TurnError;
use crate::types::Role;

#[derive(Debug, Default)]
struct Conversation {
    transcript: Transcript,
    history: ConversationHistory,
}

/// [`ConversationStore`] backed by a mutex-guarded map.
///
/// Recording a tool call that carries a response ID adds a trace for the call
/// and moves the conversation's anchor to that response.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the transcript of a conversation.
    pub fn seed(&self, transcript: Transcript) {
        let mut conversations = self.lock();
        let entry = conversations
            .entry(transcript.conversation_id.clone())
            .or_default();
        entry.transcript = transcript;
    }

    /// Replace the continuation state of a conversation.
    pub fn set_history(&self, conversation_id: &str, history: ConversationHistory) {
        self.lock()
            .entry(conversation_id.to_string())
            .or_default()
            .history = history;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn conversation<'a>(
    conversations: &'a mut HashMap<String, Conversation>,
    conversation_id: &str,
) -> &'a mut Conversation {
    conversations
        .entry(conversation_id.to_string())
        .or_insert_with(|| Conversation {
            transcript: Transcript {
                conversation_id: conversation_id.to_string(),
                turns: Vec::new(),
            },
            history: ConversationHistory::default(),
        })
}

fn push_message(transcript: &mut Transcript, message: StoredMessage) {
    let turn_index = match message.turn_id.as_deref() {
        Some(turn_id) => transcript.turns.iter().position(|t| t.id == turn_id),
        None => transcript.turns.len().checked_sub(1),
    };
    match turn_index {
        Some(index) => transcript.turns[index].messages.push(message),
        None => {
            let id = message
                .turn_id
                .clone()
                .unwrap_or_else(|| format!("turn_{}", uuid::Uuid::new_v4().simple()));
            let mut turn = Turn::new(id);
            turn.messages.push(message);
            transcript.turns.push(turn);
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn transcript(&self, conversation_id: &str) -> Result<Transcript, TurnError> {
        let mut conversations = self.lock();
        Ok(conversation(&mut conversations, conversation_id)
            .transcript
            .clone())
    }

    async fn history(&self, conversation_id: &str) -> Result<ConversationHistory, TurnError> {
        let mut conversations = self.lock();
        Ok(conversation(&mut conversations, conversation_id).history.clone())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<(), TurnError> {
        let mut conversations = self.lock();
        push_message(
            &mut conversation(&mut conversations, conversation_id).transcript,
            message,
        );
        Ok(())
    }

    async fn patch_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> Result<(), TurnError> {
        let mut conversations = self.lock();
        let transcript = &mut conversation(&mut conversations, conversation_id).transcript;
        let message = transcript
            .turns
            .iter_mut()
            .flat_map(|t| t.messages.iter_mut())
            .find(|m| m.id == message_id)
            .ok_or_else(|| {
                TurnError::Store(format!(
                    "message {message_id} not found in conversation {conversation_id}"
                ))
            })?;
        patch.apply(message);
        Ok(())
    }

    async fn record_tool_call(
        &self,
        conversation_id: &str,
        turn_id: Option<&str>,
        call: StoredToolCall,
    ) -> Result<(), TurnError> {
        let now = Utc::now();
        let mut conversations = self.lock();
        let entry = conversation(&mut conversations, conversation_id);

        if let Some(response_id) = call.response_id.as_deref().filter(|r| !r.is_empty()) {
            entry.history.traces.insert(
                call.call_id.clone(),
                Trace {
                    response_id: response_id.to_string(),
                    created_at: now,
                },
            );
            entry.history.last_anchor = Some(Anchor {
                response_id: response_id.to_string(),
                created_at: now,
            });
        }

        let mut message = StoredMessage::new(Role::Assistant, MessageKind::ToolCall, call.name.clone())
            .with_id(format!("msg_{}", call.call_id))
            .at(now);
        message.turn_id = turn_id.map(str::to_string);
        message.tool_call = Some(call);
        push_message(&mut entry.transcript, message);
        Ok(())
    }
}
