//! Anchored continuation for providers that can resume a stored response.
//!
//! Such providers expect only the delta since the anchored response (new tool
//! results, newer user text) plus the anchor's response ID. The trace index
//! maps each tool call ID to the provider response that requested it; it is
//! owned by the conversation store and only read here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContentPart, GenerateRequest, ModelMessage, Role};

/// Store record linking a tool call to the provider response that requested it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub response_id: String,
    /// Timestamp of the model call that produced the response.
    pub created_at: DateTime<Utc>,
}

/// Tool call ID -> trace.
pub type TraceIndex = HashMap<String, Trace>;

/// A provider response a continuation can resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub response_id: String,
    pub created_at: DateTime<Utc>,
}

impl Anchor {
    pub fn is_valid(&self) -> bool {
        !self.response_id.trim().is_empty()
    }
}

/// Read-only continuation state of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub last_anchor: Option<Anchor>,
    #[serde(default)]
    pub traces: TraceIndex,
}

/// Rewrite a full-history request as a delta against the last anchor.
///
/// Returns `None` when there is no valid anchor, the trace index is empty, or
/// no message qualifies. Qualifying messages are tool calls and tool results
/// whose trace maps to the anchor, and user text strictly newer than the
/// anchor. Everything else is already covered by the anchored response.
pub fn build_continuation_request(
    request: &GenerateRequest,
    history: &ConversationHistory,
) -> Option<GenerateRequest> {
    let anchor = history.last_anchor.as_ref().filter(|a| a.is_valid())?;
    if history.traces.is_empty() {
        return None;
    }

    let maps_to_anchor = |call_id: &str| {
        history
            .traces
            .get(call_id)
            .is_some_and(|trace| trace.response_id == anchor.response_id)
    };

    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::Assistant if message.has_tool_calls() => {
                let calls: Vec<ContentPart> = message
                    .content
                    .iter()
                    .filter(|part| matches!(part, ContentPart::ToolCall(call) if maps_to_anchor(&call.id)))
                    .cloned()
                    .collect();
                if !calls.is_empty() {
                    messages.push(ModelMessage {
                        content: calls,
                        ..message.clone()
                    });
                }
            }
            Role::Tool => {
                let results: Vec<ContentPart> = message
                    .content
                    .iter()
                    .filter(|part| {
                        matches!(part, ContentPart::ToolResult(result) if maps_to_anchor(&result.tool_call_id))
                    })
                    .cloned()
                    .collect();
                if !results.is_empty() {
                    messages.push(ModelMessage {
                        content: results,
                        ..message.clone()
                    });
                }
            }
            Role::User => {
                let newer = message
                    .timestamp
                    .is_some_and(|ts| ts > anchor.created_at);
                let text: Vec<ContentPart> = message
                    .content
                    .iter()
                    .filter(|part| matches!(part, ContentPart::Text { .. }))
                    .cloned()
                    .collect();
                if newer && !text.is_empty() {
                    messages.push(ModelMessage {
                        content: text,
                        ..message.clone()
                    });
                }
            }
            Role::System | Role::Assistant => {}
        }
    }

    if messages.is_empty() {
        return None;
    }

    tracing::debug!(
        anchor = %anchor.response_id,
        kept = messages.len(),
        total = request.messages.len(),
        "continuation request built"
    );

    Some(GenerateRequest {
        model: request.model.clone(),
        messages,
        tools: request.tools.clone(),
        settings: request.settings.clone(),
        previous_response_id: Some(anchor.response_id.clone()),
    })
}

/// Tool-call / tool-result messages partitioned by the anchor their traces resolve to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnchorGrouping {
    pub groups: HashMap<String, Vec<ModelMessage>>,
    /// Anchors ordered by earliest associated timestamp, ties by first-seen order.
    pub order: Vec<String>,
    /// Anchor with the most recent model-call timestamp.
    pub latest: Option<String>,
}

impl AnchorGrouping {
    pub fn group(&self, anchor: &str) -> &[ModelMessage] {
        self.groups.get(anchor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The group callers should continue from when more than one anchor is present.
    pub fn latest_group(&self) -> Option<(&str, &[ModelMessage])> {
        let anchor = self.latest.as_deref()?;
        Some((anchor, self.group(anchor)))
    }
}

struct AnchorStats {
    first_seen: usize,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
}

/// Partition tool calls and results by the anchor each call's trace resolves to.
///
/// Messages mixing calls from several anchors are split per anchor. Calls and
/// results without a trace are left out.
pub fn group_messages_by_anchor(messages: &[ModelMessage], traces: &TraceIndex) -> AnchorGrouping {
    let mut groups: HashMap<String, Vec<ModelMessage>> = HashMap::new();
    let mut stats: HashMap<String, AnchorStats> = HashMap::new();
    let mut seen = 0usize;

    for message in messages {
        if !(message.has_tool_calls() || message.has_tool_results()) {
            continue;
        }

        // Preserve the order in which anchors appear inside this message.
        let mut per_anchor: Vec<(String, Vec<ContentPart>)> = Vec::new();
        for part in &message.content {
            let call_id = match part {
                ContentPart::ToolCall(call) => call.id.as_str(),
                ContentPart::ToolResult(result) => result.tool_call_id.as_str(),
                ContentPart::Text { .. } => continue,
            };
            let Some(trace) = traces.get(call_id) else {
                continue;
            };

            let entry = stats
                .entry(trace.response_id.clone())
                .or_insert_with(|| {
                    seen += 1;
                    AnchorStats {
                        first_seen: seen,
                        earliest: trace.created_at,
                        latest: trace.created_at,
                    }
                });
            entry.earliest = entry.earliest.min(trace.created_at);
            entry.latest = entry.latest.max(trace.created_at);

            match per_anchor.iter_mut().find(|(id, _)| *id == trace.response_id) {
                Some((_, parts)) => parts.push(part.clone()),
                None => per_anchor.push((trace.response_id.clone(), vec![part.clone()])),
            }
        }

        for (anchor, parts) in per_anchor {
            groups.entry(anchor).or_default().push(ModelMessage {
                content: parts,
                ..message.clone()
            });
        }
    }

    let mut order: Vec<String> = stats.keys().cloned().collect();
    order.sort_by(|a, b| {
        let (sa, sb) = (&stats[a], &stats[b]);
        sa.earliest
            .cmp(&sb.earliest)
            .then(sa.first_seen.cmp(&sb.first_seen))
    });

    let latest = order
        .iter()
        .fold(None::<&String>, |best, anchor| match best {
            Some(current) if stats[current].latest > stats[anchor].latest => Some(current),
            _ => Some(anchor),
        })
        .cloned();

    AnchorGrouping {
        groups,
        order,
        latest,
    }
}
