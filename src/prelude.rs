//! Convenience re-exports for common use.

pub use crate::config::{RecoveryConfig, RecoveryMode, RunnerConfig, TurnwiseConfig};
pub use crate::error::{Result, TurnError, TurnFailure};
pub use crate::events::{TurnEvent, TurnEventPayload, TurnEventSink};
pub use crate::guard::{DuplicateGuard, GuardConfig};
pub use crate::plan::{Elicitation, Plan, Step, ToolCallRecord};
pub use crate::provider::{ModelCapabilities, ModelClient, RetryingClient};
pub use crate::runner::{PlanRunner, RoundContext};
pub use crate::store::{ConversationStore, InMemoryStore};
pub use crate::tools::{AgentTool, AgentToolParameters, HistoryRemoveTool, Tool, ToolArguments, ToolRegistry, ToolSet};
pub use crate::turn::{BindingBuilder, TurnOutcome, TurnRunner, TurnState};
pub use crate::types::{
    GenerateInput, GenerateOutput, GenerateRequest, GenerateResponse, ModelEvent, ModelMessage, Role,
};
pub use crate::util::{HeuristicEstimator, TokenEstimator};
