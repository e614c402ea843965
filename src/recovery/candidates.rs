//! Removal candidates derived from the transcript.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};

use crate::store::{MessageKind, StoredMessage, Transcript};
use crate::types::Role;
use crate::util::TokenEstimator;

/// A removable or summarizable transcript item.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryCandidate {
    pub message_id: String,
    pub role: Role,
    pub kind: MessageKind,
    /// Single-line, truncated content.
    pub preview: String,
    pub tokens: usize,
    pub created_at: DateTime<Utc>,
}

impl RecoveryCandidate {
    /// `id | role/kind | ~N tokens | preview`; the ID comes first so it can be copied verbatim.
    pub fn render(&self) -> String {
        format!(
            "{} | {}/{} | ~{} tokens | {}",
            self.message_id, self.role, self.kind, self.tokens, self.preview
        )
    }

    fn is_tool_item(&self) -> bool {
        matches!(self.kind, MessageKind::ToolCall | MessageKind::ToolResult)
    }
}

/// Full payload of a message as the model sees it, for sizing.
fn payload(message: &StoredMessage) -> String {
    match &message.tool_call {
        Some(call) => {
            let arguments = serde_json::Value::Object(call.arguments.clone()).to_string();
            let outcome = call.error.as_deref().unwrap_or(&call.result);
            format!("{} {} {}", call.name, arguments, outcome)
        }
        None => message.content.clone(),
    }
}

/// Collapse whitespace and cut to at most `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

/// Every live message except the latest live user message, tool items and
/// larger items first, capped at `limit`.
pub fn build_candidates(
    transcript: &Transcript,
    estimator: &dyn TokenEstimator,
    limit: usize,
    preview_chars: usize,
) -> Vec<RecoveryCandidate> {
    let protected = transcript.latest_user_message().map(|m| m.id.as_str());

    let mut candidates: Vec<RecoveryCandidate> = transcript
        .messages()
        .filter(|m| m.is_live() && Some(m.id.as_str()) != protected)
        .map(|m| {
            let body = payload(m);
            RecoveryCandidate {
                message_id: m.id.clone(),
                role: m.role,
                kind: m.kind,
                preview: preview(&body, preview_chars),
                tokens: estimator.estimate(&body),
                created_at: m.created_at,
            }
        })
        .collect();

    candidates.sort_by_key(|c| (!c.is_tool_item(), Reverse(c.tokens), c.created_at));
    candidates.truncate(limit);
    candidates
}
