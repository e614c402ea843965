//! In-memory representation of a round's steps, elicitation and content.
//!
//! Pure data: the dispatcher mutates a [`Plan`] as streamed events arrive, the
//! runner reads it back once the round settles.

pub mod extract;

pub use extract::extract_plan;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ToolCallChunk;

/// Argument map of a tool step.
pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// Structured, incrementally-built plan of a round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<Elicitation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// No steps and no elicitation; final content alone does not count.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.elicitation.is_none()
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn tool_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.step_type == StepType::Tool)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tool_steps().any(|s| s.name == name)
    }
}

/// Kind of plan step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    #[default]
    Tool,
}

/// One step of a plan. `id` is the provider call identifier (synthesized when absent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub name: String,
    #[serde(default)]
    pub args: ToolArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl Step {
    pub fn tool(id: impl Into<String>, name: impl Into<String>, args: ToolArgs) -> Self {
        Self {
            id: id.into(),
            step_type: StepType::Tool,
            name: name.into(),
            args,
            reason: None,
            response_id: None,
        }
    }
}

/// A request for user input that ends the round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Elicitation {
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub requested_schema: serde_json::Value,
}

/// Outcome of executing a tool step. A non-empty `error` marks failure but
/// never aborts the round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    #[serde(default)]
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArgs,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn success(name: impl Into<String>, arguments: ToolArgs, result: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            name: name.into(),
            arguments,
            result: result.into(),
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, arguments: ToolArgs, error: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            name: name.into(),
            arguments,
            result: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Synthesize a call identifier for providers that omit one.
pub fn synthesize_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Normalize provider arguments (object or JSON-encoded string) into a map.
pub fn parse_arguments(value: &serde_json::Value) -> ToolArgs {
    match value {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return ToolArgs::new();
            }
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::debug!(raw = trimmed, "tool arguments are not a JSON object");
                    ToolArgs::new()
                }
            }
        }
        _ => ToolArgs::new(),
    }
}

/// Merge tool calls into the plan.
///
/// A call whose ID is already present refines that step in place (name,
/// arguments and reason as they accumulate); any other call is appended as a
/// new step. Returns the number of appended steps.
pub fn extend_plan_with_tool_calls(
    plan: &mut Plan,
    calls: &[ToolCallChunk],
    response_id: Option<&str>,
) -> usize {
    let mut appended = 0usize;
    for call in calls {
        let existing = call
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .and_then(|id| plan.steps.iter_mut().find(|s| s.id == id));

        match existing {
            Some(step) => {
                if !call.name.is_empty() {
                    step.name = call.name.clone();
                }
                let args = parse_arguments(&call.arguments);
                if !args.is_empty() {
                    step.args = args;
                }
                if call.reason.is_some() {
                    step.reason = call.reason.clone();
                }
                if let Some(response_id) = response_id {
                    step.response_id = Some(response_id.to_string());
                }
            }
            None => {
                let id = call
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(synthesize_call_id);
                plan.steps.push(Step {
                    id,
                    step_type: StepType::Tool,
                    name: call.name.clone(),
                    args: parse_arguments(&call.arguments),
                    reason: call.reason.clone(),
                    response_id: response_id.map(str::to_string),
                });
                appended += 1;
            }
        }
    }
    appended
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_ids_are_refined_in_place() {
        let mut plan = Plan::new();
        let first = ToolCallChunk::new("c1", "search", json!("{\"q\":"));
        assert_eq!(extend_plan_with_tool_calls(&mut plan, &[first], Some("resp_1")), 1);

        let refined = ToolCallChunk::new("c1", "search", json!({"q": "rust"}));
        assert_eq!(extend_plan_with_tool_calls(&mut plan, &[refined], None), 0);

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].args["q"], "rust");
        assert_eq!(plan.steps[0].response_id.as_deref(), Some("resp_1"));
    }

    #[test]
    fn missing_ids_are_synthesized() {
        let mut plan = Plan::new();
        let calls = vec![
            ToolCallChunk {
                name: "a".into(),
                ..Default::default()
            },
            ToolCallChunk {
                name: "b".into(),
                ..Default::default()
            },
        ];
        assert_eq!(extend_plan_with_tool_calls(&mut plan, &calls, None), 2);
        assert!(plan.steps.iter().all(|s| s.id.starts_with("call_")));
        assert_ne!(plan.steps[0].id, plan.steps[1].id);
    }

    #[test]
    fn string_arguments_are_decoded() {
        let args = parse_arguments(&json!("{\"path\": \"/tmp\"}"));
        assert_eq!(args["path"], "/tmp");
        assert!(parse_arguments(&json!("not json")).is_empty());
        assert!(parse_arguments(&serde_json::Value::Null).is_empty());
    }

    #[test]
    fn errored_record_requires_message() {
        let mut record = ToolCallRecord::success("x", ToolArgs::new(), "ok");
        assert!(!record.is_error());
        record.error = Some(String::new());
        assert!(!record.is_error());
        record.error = Some("bad".into());
        assert!(record.is_error());
    }
}
