//! Tool registry consumed by the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use crate::error::TurnError;
use crate::plan::ToolArgs;
use crate::types::ToolDefinition;

/// Executes tools by name and exposes their definitions.
///
/// Implementations must tolerate concurrent `execute` calls; every dispatched
/// step runs on its own task.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Definitions whose name matches `pattern` (`*` matches any run of characters).
    fn match_definition(&self, pattern: &str) -> Vec<ToolDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| glob_matches(pattern, &d.name))
            .collect()
    }

    /// Run a tool and render its output as the text handed back to the model.
    async fn execute(
        &self,
        name: &str,
        args: &ToolArgs,
        ctx: &ToolExecutionContext,
    ) -> Result<String, TurnError>;
}

pub(crate) fn glob_matches(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Tool output as text: strings verbatim, everything else as JSON.
pub fn render_output(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Registry over a fixed list of [`Tool`]s, in registration order.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; a later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl FromIterator<Arc<dyn Tool>> for ToolSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Tool>>>(iter: I) -> Self {
        let mut set = Self::new();
        for tool in iter {
            set.register(tool);
        }
        set
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}

#[async_trait]
impl ToolRegistry for ToolSet {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    async fn execute(
        &self,
        name: &str,
        args: &ToolArgs,
        ctx: &ToolExecutionContext,
    ) -> Result<String, TurnError> {
        let tool = self.get(name).ok_or_else(|| TurnError::ToolExecution {
            tool_name: name.to_string(),
            message: "unknown tool".to_string(),
        })?;
        let output = tool
            .execute(&ToolArguments::new(args.clone()), ctx)
            .await?;
        Ok(render_output(&output))
    }
}
