//! Built-in history-removal tool, the only tool offered during overflow recovery.
//!
//! The summary left behind is live history standing in for the archived
//! messages; only the recovery engine's own note is interim.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::AgentToolParameters;
use crate::error::TurnError;
use crate::plan::ToolArgs;
use crate::store::{ConversationStore, MessageKind, MessagePatch, StoredMessage};
use crate::types::Role;

/// Default tool name.
pub const HISTORY_REMOVE_TOOL: &str = "history_remove";

/// Argument holding the IDs to remove.
pub const MESSAGE_IDS_ARG: &str = "messageIds";

/// Archives transcript messages and leaves a summary in their place.
pub struct HistoryRemoveTool {
    name: String,
    parameters: AgentToolParameters,
    store: Arc<dyn ConversationStore>,
}

impl HistoryRemoveTool {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self::named(HISTORY_REMOVE_TOOL, store)
    }

    /// Register under a different name (must match the recovery configuration).
    pub fn named(name: impl Into<String>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            name: name.into(),
            parameters: AgentToolParameters::object()
                .string_array(
                    MESSAGE_IDS_ARG,
                    "IDs of the messages to remove, copied exactly from the candidate list",
                    true,
                )
                .string(
                    "summary",
                    "Short summary of the removed content that should stay in context",
                    false,
                )
                .build(),
            store,
        }
    }
}

/// Message IDs a removal call's result reports as archived.
///
/// `None` when the result is not the tool's JSON report.
pub fn confirmed_removals(result: &str) -> Option<Vec<String>> {
    let report: serde_json::Value = serde_json::from_str(result).ok()?;
    let removed = report.get("removed")?.as_array()?;
    Some(
        removed
            .iter()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect(),
    )
}

/// Message IDs named by a removal call's arguments.
pub fn removed_message_ids(args: &ToolArgs) -> Vec<String> {
    ToolArguments::new(args.clone())
        .get_string_list(MESSAGE_IDS_ARG)
        .unwrap_or_default()
}

#[async_trait]
impl Tool for HistoryRemoveTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Remove messages from the conversation history to free context space, optionally leaving a summary"
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, TurnError> {
        let ids = args.get_string_list(MESSAGE_IDS_ARG)?;
        if ids.is_empty() {
            return Err(TurnError::InvalidArgument(format!(
                "{MESSAGE_IDS_ARG} must name at least one message"
            )));
        }

        // The request being served stays in context.
        let transcript = self.store.transcript(&ctx.conversation_id).await?;
        let protected = transcript.latest_user_message().map(|m| m.id.clone());

        let mut removed = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        let mut refused = Vec::new();
        for id in ids {
            if protected.as_deref() == Some(id.as_str()) {
                tracing::warn!(message_id = %id, "history removal refused the current request");
                refused.push(id);
                continue;
            }
            match self
                .store
                .patch_message(&ctx.conversation_id, &id, MessagePatch::archive())
                .await
            {
                Ok(()) => removed.push(id),
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "history removal skipped message");
                    missing.push(id);
                }
            }
        }

        if removed.is_empty() {
            let mut message = String::from("no messages were removed");
            if !missing.is_empty() {
                message.push_str(&format!("; unknown: {}", missing.join(", ")));
            }
            if !refused.is_empty() {
                message.push_str(&format!("; current request cannot be removed: {}", refused.join(", ")));
            }
            return Err(TurnError::ToolExecution {
                tool_name: self.name.clone(),
                message,
            });
        }

        let summary = args
            .get_str_opt("summary")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Removed {} earlier messages to free context.", removed.len()));
        let mut note = StoredMessage::new(Role::Assistant, MessageKind::Summary, summary);
        note.turn_id = ctx.turn_id.clone();
        self.store.append_message(&ctx.conversation_id, note).await?;

        tracing::info!(removed = removed.len(), missing = missing.len(), "history messages archived");
        Ok(json!({ "removed": removed, "missing": missing, "refused": refused }))
    }
}

impl std::fmt::Debug for HistoryRemoveTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRemoveTool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Transcript, Turn};

    fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let mut turn = Turn::new("t1");
        turn.messages.push(StoredMessage::user("first").with_id("m1"));
        turn.messages.push(StoredMessage::assistant("answer").with_id("m2"));
        turn.messages.push(StoredMessage::user("second").with_id("m3"));
        store.seed(Transcript {
            conversation_id: "conv".into(),
            turns: vec![turn],
        });
        store
    }

    fn ctx() -> ToolExecutionContext {
        ToolExecutionContext {
            conversation_id: "conv".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn archives_known_messages_and_appends_summary() {
        let store = seeded_store();
        let tool = HistoryRemoveTool::new(store.clone());
        let args = ToolArguments::new(
            json!({"messageIds": ["m2", "nope"], "summary": "old answer"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        let output = tool.execute(&args, &ctx()).await.expect("remove");
        assert_eq!(output["removed"], json!(["m2"]));
        assert_eq!(output["missing"], json!(["nope"]));

        let transcript = store.transcript("conv").await.expect("transcript");
        assert!(transcript.message("m2").is_some_and(|m| m.archived));
        let summary = transcript
            .messages()
            .find(|m| m.kind == MessageKind::Summary)
            .expect("summary appended");
        assert!(!summary.interim);
        assert_eq!(summary.content, "old answer");
    }

    #[tokio::test]
    async fn current_request_is_never_archived() {
        let store = seeded_store();
        let tool = HistoryRemoveTool::new(store.clone());
        let args = ToolArguments::new(
            json!({"messageIds": ["m1", "m3"]}).as_object().cloned().unwrap_or_default(),
        );
        let output = tool.execute(&args, &ctx()).await.expect("remove");
        assert_eq!(output["removed"], json!(["m1"]));
        assert_eq!(output["refused"], json!(["m3"]));

        let transcript = store.transcript("conv").await.expect("transcript");
        assert!(transcript.message("m3").is_some_and(|m| m.is_live()));

        let only_current = ToolArguments::new(
            json!({"messageIds": ["m3"]}).as_object().cloned().unwrap_or_default(),
        );
        let err = tool.execute(&only_current, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("current request cannot be removed: m3"));
    }

    #[test]
    fn confirmed_removals_read_the_report() {
        let report = r#"{"removed":["a","b"],"missing":["x"],"refused":[]}"#;
        assert_eq!(
            confirmed_removals(report),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(confirmed_removals("removed a and b"), None);
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let tool = HistoryRemoveTool::new(seeded_store());
        let args = ToolArguments::new(json!({"messageIds": []}).as_object().cloned().unwrap_or_default());
        assert!(tool.execute(&args, &ctx()).await.is_err());
    }
}
