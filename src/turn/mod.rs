//! Turn loop: rounds until the model answers, asks, or fails.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TurnError;
use crate::plan::{Plan, ToolCallRecord};
use crate::runner::{PlanRunner, RoundContext};
use crate::types::{GenerateInput, GenerateOutput, Usage};

/// Where a turn stands when the next round's input is built.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub conversation_id: String,
    pub turn_id: Option<String>,
    /// 1-based number of the round about to run.
    pub round: usize,
    /// Every tool call executed so far in this turn.
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Renders the model input for each round (prompt templates, history, tools).
#[async_trait]
pub trait BindingBuilder: Send + Sync {
    async fn build(&self, state: &TurnState) -> Result<GenerateInput, TurnError>;
}

/// Final result of a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Plan of the last round: final content or an elicitation.
    pub plan: Plan,
    pub rounds: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: Usage,
}

/// Repeats [`PlanRunner`] rounds for one user turn.
pub struct TurnRunner {
    runner: Arc<PlanRunner>,
    builder: Arc<dyn BindingBuilder>,
}

impl TurnRunner {
    pub fn new(runner: Arc<PlanRunner>, builder: Arc<dyn BindingBuilder>) -> Self {
        Self { runner, builder }
    }

    /// Serve one turn.
    ///
    /// Each round's duplicate guard is seeded with the previous round's tool
    /// results unless the builder supplied its own. A round that recovered
    /// from a context overflow is retried once with a freshly built input.
    pub async fn run(
        &self,
        conversation_id: &str,
        turn_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let max_rounds = self.runner.config().runner.max_rounds;
        let mut state = TurnState {
            conversation_id: conversation_id.to_string(),
            turn_id: turn_id.map(str::to_string),
            round: 0,
            tool_calls: Vec::new(),
        };
        let mut previous: Vec<ToolCallRecord> = Vec::new();
        let mut usage = Usage::default();
        let mut recovered = false;

        while state.round < max_rounds {
            if cancel.is_cancelled() {
                return Err(TurnError::Canceled);
            }
            state.round += 1;

            let mut input = self.builder.build(&state).await?;
            if input.prior_tool_calls.is_empty() {
                input.prior_tool_calls = previous.clone();
            }

            let mut round = RoundContext {
                cancel: cancel.clone(),
                round: state.round,
                ..RoundContext::default()
            };
            let mut output = GenerateOutput::default();
            let result = self.runner.run(&mut round, &input, &mut output).await;
            usage.merge(&output.usage);
            state.tool_calls.extend(output.tool_calls.iter().cloned());

            let plan = match result {
                Ok(plan) => plan,
                Err(TurnError::ContextLimitRecovered { summary }) if !recovered => {
                    tracing::info!(round = state.round, summary = %summary, "retrying round after recovery");
                    recovered = true;
                    previous.clear();
                    continue;
                }
                Err(e) => return Err(e),
            };

            if plan.elicitation.is_some() || plan.steps.is_empty() {
                tracing::debug!(rounds = state.round, tool_calls = state.tool_calls.len(), "turn finished");
                return Ok(TurnOutcome {
                    plan,
                    rounds: state.round,
                    tool_calls: state.tool_calls,
                    usage,
                });
            }
            previous = output.tool_calls;
        }

        Err(TurnError::InvalidState(format!(
            "turn did not finish within {max_rounds} rounds"
        )))
    }
}

impl std::fmt::Debug for TurnRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRunner")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}
