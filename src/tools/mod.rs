//! Tool system for function calling.

pub mod arguments;
pub mod history;
pub mod registry;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use history::{confirmed_removals, removed_message_ids, HistoryRemoveTool, HISTORY_REMOVE_TOOL};
pub use registry::{render_output, ToolRegistry, ToolSet};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::{AgentToolParameters, ParameterBuilder};
