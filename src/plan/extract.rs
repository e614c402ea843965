//! Fallback plan extraction from raw response content.
//!
//! Some providers answer with a JSON tool call or elicitation block in plain
//! content instead of structured tool-call events.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::{extend_plan_with_tool_calls, Elicitation, Plan};
use crate::error::TurnError;
use crate::types::ToolCallChunk;

fn fenced_json_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced json regex must compile")
    })
}

/// Locate a candidate JSON object in `content`.
fn json_candidate(content: &str) -> Option<&str> {
    if let Some(captures) = fenced_json_pattern().captures(content) {
        return captures.get(1).map(|m| m.as_str());
    }
    let trimmed = content.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}')).then_some(trimmed)
}

/// Extract plan steps or an elicitation from raw content.
///
/// Returns an empty plan when the content carries no JSON block, and
/// [`TurnError::PlanDecoding`] when a block is present but malformed or of an
/// unrecognised shape. Callers treat the error as an extraction failure only.
pub fn extract_plan(content: &str, response_id: Option<&str>) -> Result<Plan, TurnError> {
    let mut plan = Plan::new();
    let Some(candidate) = json_candidate(content) else {
        return Ok(plan);
    };
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| TurnError::PlanDecoding(format!("malformed JSON block: {e}")))?;

    if let Some(elicitation) = elicitation_from(&value) {
        plan.elicitation = Some(elicitation);
        return Ok(plan);
    }

    let calls = tool_calls_from(&value);
    if calls.is_empty() {
        return Err(TurnError::PlanDecoding(
            "JSON block is neither a tool call nor an elicitation".to_string(),
        ));
    }
    extend_plan_with_tool_calls(&mut plan, &calls, response_id);
    Ok(plan)
}

fn elicitation_from(value: &Value) -> Option<Elicitation> {
    let body = match value.get("elicitation") {
        Some(inner) if inner.is_object() => inner,
        _ if value.get("type").and_then(Value::as_str) == Some("elicitation") => value,
        _ => return None,
    };
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let requested_schema = body
        .get("requestedSchema")
        .or_else(|| body.get("requested_schema"))
        .or_else(|| body.get("schema"))
        .cloned()
        .unwrap_or(Value::Null);
    Some(Elicitation {
        message,
        requested_schema,
    })
}

fn tool_calls_from(value: &Value) -> Vec<ToolCallChunk> {
    let list = value
        .get("toolCalls")
        .or_else(|| value.get("tool_calls"))
        .and_then(Value::as_array);
    match list {
        Some(items) => items.iter().filter_map(tool_call_from).collect(),
        None => tool_call_from(value).into_iter().collect(),
    }
}

fn tool_call_from(value: &Value) -> Option<ToolCallChunk> {
    // OpenAI-style {"function": {"name", "arguments"}} wrapper.
    let body = value.get("function").filter(|f| f.is_object()).unwrap_or(value);
    let name = body
        .get("tool")
        .or_else(|| body.get("name"))
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())?;
    let arguments = body
        .get("arguments")
        .or_else(|| body.get("args"))
        .or_else(|| body.get("input"))
        .cloned()
        .unwrap_or(Value::Null);
    Some(ToolCallChunk {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
        name: name.to_string(),
        arguments,
        reason: body
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_yields_empty_plan() {
        let plan = extract_plan("The answer is 42.", None).expect("no block is not an error");
        assert!(plan.is_empty());
    }

    #[test]
    fn fenced_tool_call_is_extracted() {
        let content = "Let me look.\n```json\n{\"tool\": \"search\", \"arguments\": {\"q\": \"x\"}, \"reason\": \"need data\"}\n```";
        let plan = extract_plan(content, Some("resp_9")).expect("extract");
        assert_eq!(plan.steps.len(), 1);
        let step = &plan.steps[0];
        assert_eq!(step.name, "search");
        assert_eq!(step.args["q"], "x");
        assert_eq!(step.reason.as_deref(), Some("need data"));
        assert_eq!(step.response_id.as_deref(), Some("resp_9"));
    }

    #[test]
    fn tool_call_lists_keep_order() {
        let content = r#"{"tool_calls": [
            {"id": "a", "function": {"name": "first", "arguments": "{\"n\":1}"}},
            {"id": "b", "name": "second", "args": {"n": 2}}
        ]}"#;
        let plan = extract_plan(content, None).expect("extract");
        let names: Vec<_> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(plan.steps[0].args["n"], 1);
        assert_eq!(plan.steps[1].id, "b");
    }

    #[test]
    fn elicitation_block_is_extracted() {
        let content = r#"{"elicitation": {"message": "Which repo?", "requestedSchema": {"type": "object"}}}"#;
        let plan = extract_plan(content, None).expect("extract");
        let elicitation = plan.elicitation.expect("elicitation");
        assert_eq!(elicitation.message, "Which repo?");
        assert_eq!(elicitation.requested_schema["type"], "object");
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn malformed_block_is_a_decoding_error() {
        let err = extract_plan("```json\n{\"tool\": }\n```", None).unwrap_err();
        assert!(matches!(err, TurnError::PlanDecoding(_)));

        let err = extract_plan(r#"{"unrelated": true}"#, None).unwrap_err();
        assert!(matches!(err, TurnError::PlanDecoding(_)));
    }
}
