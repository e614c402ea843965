//! Context-overflow recovery.
//!
//! On the first overflow of a round the engine lists removable transcript
//! messages, asks the model (through a constrained run that can only call the
//! history-removal tool) to prune them, and leaves one interim note explaining
//! what happened. The round then fails with
//! [`TurnError::ContextLimitRecovered`] so the caller retries the original
//! request against the reduced history.

pub mod budget;
pub mod candidates;
pub mod instruction;

pub use budget::{estimated_savings, parse_overflow_tokens, prune_committed_user_messages};
pub use candidates::{build_candidates, RecoveryCandidate};
pub use instruction::render_instruction;

use crate::config::RecoveryMode;
use crate::error::TurnError;
use crate::events::TurnEventPayload;
use crate::runner::{PlanRunner, RoundContext};
use crate::store::StoredMessage;
use crate::tools::{confirmed_removals, removed_message_ids};
use crate::types::{GenerateInput, GenerateOutput, ModelMessage};

/// Recovery bound to the runner whose round overflowed.
pub struct RecoveryEngine<'r> {
    runner: &'r PlanRunner,
}

impl<'r> RecoveryEngine<'r> {
    pub fn new(runner: &'r PlanRunner) -> Self {
        Self { runner }
    }

    /// Recover from an overflow of `failed_input` and classify the outcome.
    ///
    /// Returns [`TurnError::ContextLimitRecovered`] on success and
    /// [`TurnError::ContextLimitUnrecoverable`] otherwise. A targeted attempt
    /// that overflows again falls back once to compaction.
    pub async fn present_context_limit_exceeded(
        &self,
        round: &RoundContext,
        failed_input: &GenerateInput,
        error_message: &str,
    ) -> TurnError {
        let config = &self.runner.config().recovery;
        let emitter = self.runner.emitter(&failed_input.conversation_id);

        let mut attempt = self
            .attempt(round, failed_input, error_message, config.mode, config.candidate_limit)
            .await;
        if config.mode == RecoveryMode::Targeted {
            if let Err(e) = &attempt {
                if e.is_context_overflow() {
                    tracing::info!(error = %e, "targeted recovery overflowed; falling back to compaction");
                    attempt = self
                        .attempt(
                            round,
                            failed_input,
                            error_message,
                            RecoveryMode::Compaction,
                            config.compaction_candidate_limit,
                        )
                        .await;
                }
            }
        }

        match attempt {
            Ok(summary) => {
                tracing::info!(summary = %summary, "context limit recovered");
                emitter.emit(TurnEventPayload::RecoveryCompleted {
                    summary: summary.clone(),
                });
                TurnError::ContextLimitRecovered { summary }
            }
            Err(e) => {
                tracing::warn!(error = %e, "context limit recovery failed");
                emitter.emit(TurnEventPayload::RecoveryFailed {
                    error: e.to_string(),
                });
                TurnError::ContextLimitUnrecoverable {
                    message: format!("{error_message} (recovery failed: {e})"),
                }
            }
        }
    }

    async fn attempt(
        &self,
        round: &RoundContext,
        failed_input: &GenerateInput,
        error_message: &str,
        mode: RecoveryMode,
        candidate_limit: usize,
    ) -> Result<String, TurnError> {
        let config = &self.runner.config().recovery;
        let estimator = self.runner.estimator();
        let conversation_id = failed_input.conversation_id.as_str();

        let transcript = self.runner.store().transcript(conversation_id).await?;
        let candidates =
            build_candidates(&transcript, estimator, candidate_limit, config.preview_chars);
        if candidates.is_empty() {
            return Err(TurnError::InvalidState(
                "no removable messages in the transcript".to_string(),
            ));
        }

        let tools = self.runner.tools().match_definition(&config.removal_tool);
        if tools.is_empty() {
            return Err(TurnError::Configuration(format!(
                "history removal tool `{}` is not registered",
                config.removal_tool
            )));
        }

        let overflow_tokens = parse_overflow_tokens(error_message);
        let instruction = render_instruction(
            mode,
            error_message,
            &candidates,
            &config.removal_tool,
            overflow_tokens,
        );

        let mut constrained = failed_input.without_system_content();
        constrained.tools = tools;
        constrained.prior_tool_calls.clear();

        if let Some(deficit) = overflow_tokens {
            let mut probe = constrained.clone();
            probe.messages.push(ModelMessage::user(instruction.clone()));
            let saved = estimated_savings(estimator, &failed_input.to_request(), &probe.to_request());
            if saved < deficit {
                let freed = prune_committed_user_messages(&mut constrained, deficit - saved, estimator);
                tracing::debug!(deficit, saved, freed, "pruned committed user messages for recovery");
            }
        }
        constrained.messages.push(ModelMessage::user(instruction));

        tracing::info!(
            conversation = %conversation_id,
            mode = %mode,
            candidates = candidates.len(),
            overflow_tokens = ?overflow_tokens,
            "starting context limit recovery"
        );
        self.runner
            .emitter(conversation_id)
            .emit(TurnEventPayload::RecoveryStarted {
                mode: mode.to_string(),
                candidates: candidates.len(),
                overflow_tokens,
            });

        let mut nested = round.for_recovery();
        let mut output = GenerateOutput::default();
        self.runner.run(&mut nested, &constrained, &mut output).await?;

        let removals: Vec<_> = output
            .tool_calls
            .iter()
            .filter(|r| r.name == config.removal_tool && !r.is_error())
            .collect();
        if removals.is_empty() {
            return Err(TurnError::InvalidState(
                "recovery run removed no messages".to_string(),
            ));
        }
        let removed: usize = removals
            .iter()
            .map(|r| {
                confirmed_removals(&r.result)
                    .unwrap_or_else(|| removed_message_ids(&r.arguments))
                    .len()
            })
            .sum();

        let summary = format!(
            "The conversation exceeded the model's context window; {removed} earlier message(s) were removed or summarized to make room. Continuing with the current request."
        );
        let mut note = StoredMessage::assistant(summary.clone()).interim();
        note.turn_id = failed_input.turn_id.clone();
        self.runner
            .store()
            .append_message(conversation_id, note)
            .await?;
        Ok(summary)
    }
}

impl std::fmt::Debug for RecoveryEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryEngine").finish_non_exhaustive()
    }
}
