//! Tests for the tool system.

mod common;

use std::sync::Arc;

use serde_json::json;

use turnwise::error::TurnError;
use turnwise::plan::ToolArgs;
use turnwise::store::{ConversationStore, InMemoryStore, MessageKind, StoredMessage, Transcript, Turn};
use turnwise::tools::*;

fn args(value: serde_json::Value) -> ToolArgs {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn parameter_builder_constructs_schema() {
    let params = AgentToolParameters::object()
        .string("query", "Search query", true)
        .integer("limit", "Max results", false)
        .boolean("verbose", "Enable verbose output", false)
        .string_array("tags", "Filter tags", false)
        .build();

    let schema = &params.schema;
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["query"]["type"], "string");
    assert_eq!(schema["properties"]["limit"]["type"], "integer");
    assert_eq!(schema["properties"]["tags"]["items"]["type"], "string");
    assert_eq!(schema["required"], json!(["query"]));
}

#[test]
fn empty_parameters() {
    let params = AgentToolParameters::empty();
    assert_eq!(params.schema["type"], "object");
}

#[test]
fn tool_arguments_typed_access() {
    let arguments = ToolArguments::new(args(json!({
        "path": "/tmp/test.txt",
        "count": 3,
        "dry_run": true,
        "ids": "m1"
    })));
    assert_eq!(arguments.get_str("path").unwrap(), "/tmp/test.txt");
    assert_eq!(arguments.get_i64("count").unwrap(), 3);
    assert_eq!(arguments.get_bool_opt("dry_run"), Some(true));
    assert_eq!(arguments.get_string_list("ids").unwrap(), vec!["m1".to_string()]);
    assert!(matches!(
        arguments.get_str("missing"),
        Err(TurnError::InvalidArgument(_))
    ));
}

#[test]
fn tool_arguments_deserialize() {
    #[derive(serde::Deserialize)]
    struct Query {
        q: String,
        limit: Option<u32>,
    }

    let query: Query = ToolArguments::new(args(json!({"q": "rust"})))
        .deserialize()
        .unwrap();
    assert_eq!(query.q, "rust");
    assert!(query.limit.is_none());
}

#[test]
fn tool_definitions_follow_registration_order() {
    let tools = ToolSet::new()
        .with_tool(AgentTool::new("b_tool", "second", AgentToolParameters::empty(), |_, _| async {
            Ok(json!(null))
        }))
        .with_tool(AgentTool::new("a_tool", "first", AgentToolParameters::empty(), |_, _| async {
            Ok(json!(null))
        }));
    let names: Vec<String> = tools.definitions().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["b_tool", "a_tool"]);
}

#[test]
fn definitions_match_glob_patterns() {
    let tools = ToolSet::new()
        .with_tool(AgentTool::new("history_remove", "", AgentToolParameters::empty(), |_, _| async {
            Ok(json!(null))
        }))
        .with_tool(AgentTool::new("history_list", "", AgentToolParameters::empty(), |_, _| async {
            Ok(json!(null))
        }))
        .with_tool(AgentTool::new("search", "", AgentToolParameters::empty(), |_, _| async {
            Ok(json!(null))
        }));

    assert_eq!(tools.match_definition("history_*").len(), 2);
    assert_eq!(tools.match_definition("search").len(), 1);
    assert!(tools.match_definition("history").is_empty());
}

#[tokio::test]
async fn registry_renders_tool_output() {
    let tools = ToolSet::new()
        .with_tool(common::search_tool())
        .with_tool(AgentTool::new("stats", "", AgentToolParameters::empty(), |_, _| async {
            Ok(json!({"hits": 2}))
        }));
    let ctx = ToolExecutionContext::default();

    let text = tools.execute("search", &args(json!({"q": "x"})), &ctx).await.unwrap();
    assert_eq!(text, "results for x");
    let json = tools.execute("stats", &ToolArgs::new(), &ctx).await.unwrap();
    assert_eq!(json, r#"{"hits":2}"#);

    let err = tools.execute("nope", &ToolArgs::new(), &ctx).await.unwrap_err();
    assert!(matches!(err, TurnError::ToolExecution { .. }));
}

#[tokio::test]
async fn history_remove_archives_and_reports_missing_ids() {
    let store = Arc::new(InMemoryStore::new());
    let mut turn = Turn::new("t1");
    turn.messages.push(StoredMessage::user("q").with_id("m1"));
    turn.messages.push(StoredMessage::assistant("a").with_id("m2"));
    turn.messages.push(StoredMessage::user("follow-up").with_id("m3"));
    store.seed(Transcript {
        conversation_id: "conv".into(),
        turns: vec![turn],
    });

    let tools = ToolSet::new().with_tool(HistoryRemoveTool::new(store.clone()));
    let ctx = ToolExecutionContext {
        conversation_id: "conv".into(),
        turn_id: Some("t1".into()),
        ..Default::default()
    };
    let output = tools
        .execute(
            HISTORY_REMOVE_TOOL,
            &args(json!({"messageIds": ["m1", "ghost"], "summary": "User asked q."})),
            &ctx,
        )
        .await
        .unwrap();
    let report: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(report["removed"], json!(["m1"]));
    assert_eq!(report["missing"], json!(["ghost"]));

    let transcript = store.transcript("conv").await.unwrap();
    assert!(transcript.message("m1").unwrap().archived);
    let summary = transcript
        .messages()
        .find(|m| m.kind == MessageKind::Summary)
        .unwrap();
    assert_eq!(summary.content, "User asked q.");
    assert!(summary.is_live());
}

#[test]
fn removed_ids_are_read_from_arguments() {
    assert_eq!(
        removed_message_ids(&args(json!({"messageIds": ["a", "b"]}))),
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(removed_message_ids(&args(json!({}))).is_empty());
}
