//! Plan runner: one model round, its tool fan-out and overflow handling.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::TurnwiseConfig;
use crate::continuation::build_continuation_request;
use crate::dispatch::{DispatchSession, StreamDispatcher};
use crate::error::TurnError;
use crate::events::{EventEmitter, TurnEventPayload, TurnEventSink};
use crate::plan::{extract_plan, Plan};
use crate::provider::{response_events, ModelClient, ModelEventStream};
use crate::recovery::RecoveryEngine;
use crate::store::ConversationStore;
use crate::tools::{removed_message_ids, ToolRegistry};
use crate::types::{GenerateInput, GenerateOutput, GenerateRequest, ModelEvent, StreamEventType};
use crate::util::{HeuristicEstimator, TokenEstimator};

/// Request-scoped flags of one round.
#[derive(Debug, Clone, Default)]
pub struct RoundContext {
    /// Cancels the in-flight model call; dispatched tool tasks still run to completion.
    pub cancel: CancellationToken,
    /// Set once overflow recovery has been entered; it is never entered twice.
    pub recovery_attempted: bool,
    /// Duplicate suppression is off and hard tool failures are only logged.
    pub recovery_mode: bool,
    /// Round number within the turn, for events and logs.
    pub round: usize,
}

impl RoundContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    /// Context for the constrained run issued by overflow recovery.
    pub fn for_recovery(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            recovery_attempted: true,
            recovery_mode: true,
            round: self.round,
        }
    }
}

/// Drives a single round against the model and the tool registry.
pub struct PlanRunner {
    client: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    estimator: Arc<dyn TokenEstimator>,
    config: TurnwiseConfig,
    event_sink: Option<TurnEventSink>,
}

impl PlanRunner {
    pub fn new(
        client: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolRegistry>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            client,
            tools,
            store,
            estimator: Arc::new(HeuristicEstimator),
            config: TurnwiseConfig::default(),
            event_sink: None,
        }
    }

    pub fn with_config(mut self, config: TurnwiseConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_event_sink(mut self, sink: TurnEventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &TurnwiseConfig {
        &self.config
    }

    pub(crate) fn tools(&self) -> &Arc<dyn ToolRegistry> {
        &self.tools
    }

    pub(crate) fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub(crate) fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    pub(crate) fn emitter(&self, conversation_id: &str) -> EventEmitter {
        EventEmitter::new(conversation_id, self.event_sink.clone())
    }

    /// Run one round: generate, dispatch tool steps, and settle.
    ///
    /// Text accumulates into `output`, as do the tool call records of the
    /// round. A first context overflow enters recovery and the round fails
    /// with its outcome ([`TurnError::ContextLimitRecovered`] when the caller
    /// should retry).
    pub fn run<'a>(
        &'a self,
        round: &'a mut RoundContext,
        input: &'a GenerateInput,
        output: &'a mut GenerateOutput,
    ) -> BoxFuture<'a, Result<Plan, TurnError>> {
        Box::pin(self.run_round(round, input, output))
    }

    async fn run_round(
        &self,
        round: &mut RoundContext,
        input: &GenerateInput,
        output: &mut GenerateOutput,
    ) -> Result<Plan, TurnError> {
        let emitter = self.emitter(&input.conversation_id);
        emitter.emit(TurnEventPayload::RoundStarted {
            round: round.round,
            recovery_mode: round.recovery_mode,
        });

        let dispatcher = StreamDispatcher::new(Arc::clone(&self.tools), Arc::clone(&self.store))
            .with_guard_config(self.config.guard)
            .with_tool_timeout(self.config.runner.tool_timeout());
        let session = dispatcher.open(input, round.recovery_mode, emitter.clone());

        let (request, continuation) = self.prepare_request(round, input).await;
        let generated = self.generate(round, &session, &request, output).await;
        session.barrier().await;
        if let Err(e) = generated {
            output.tool_calls = session.finish().await.records;
            return Err(self.fail(round, input, continuation, e, &emitter).await);
        }

        if session.plan().is_empty() && !output.content.trim().is_empty() {
            self.extract_fallback(&session, output);
        }

        let mut plan = session.plan();
        refine_plan(&mut plan);

        let removal_tool = self.config.recovery.removal_tool.as_str();
        // Recovery runs end at the removal; the caller retries the original request.
        if plan.has_tool(removal_tool) && !round.recovery_mode {
            session.barrier().await;
            let removed: HashSet<String> = plan
                .tool_steps()
                .filter(|s| s.name == removal_tool)
                .flat_map(|s| removed_message_ids(&s.args))
                .collect();
            tracing::debug!(session = %session.id(), removed = removed.len(), "follow-up after history removal");

            let follow_up = input.without_messages(&removed);
            output.content.clear();
            let steps_before = session.plan().steps.len();
            let request = follow_up.to_request();
            if let Err(e) = self.generate(round, &session, &request, output).await {
                output.tool_calls = session.finish().await.records;
                return Err(self.fail(round, input, false, e, &emitter).await);
            }
            if session.plan().steps.len() == steps_before && !output.content.trim().is_empty() {
                self.extract_fallback(&session, output);
            }
        }

        let outcome = session.finish().await;
        output.tool_calls = outcome.records;
        let mut plan = outcome.plan;
        refine_plan(&mut plan);
        if !output.content.is_empty() {
            plan.content = Some(output.content.clone());
        }

        if let Some(error) = outcome.first_error {
            if !round.recovery_mode {
                emitter.emit(TurnEventPayload::RoundFailed {
                    round: round.round,
                    error: error.to_string(),
                });
                return Err(error);
            }
        }

        emitter.emit(TurnEventPayload::RoundCompleted {
            round: round.round,
            steps: plan.steps.len(),
        });
        Ok(plan)
    }

    /// Full-history request, or its anchored delta when the model can resume.
    async fn prepare_request(
        &self,
        round: &RoundContext,
        input: &GenerateInput,
    ) -> (GenerateRequest, bool) {
        let request = input.to_request();
        if round.recovery_mode || !self.client.capabilities(&input.model).supports_continuation {
            return (request, false);
        }
        match self.store.history(&input.conversation_id).await {
            Ok(history) => match build_continuation_request(&request, &history) {
                Some(delta) => (delta, true),
                None => (request, false),
            },
            Err(e) => {
                tracing::warn!(error = %e, "continuation history unavailable; sending full request");
                (request, false)
            }
        }
    }

    /// One model call, streamed when supported, with every event fed to the session.
    async fn generate(
        &self,
        round: &RoundContext,
        session: &DispatchSession,
        request: &GenerateRequest,
        output: &mut GenerateOutput,
    ) -> Result<(), TurnError> {
        if !self.client.capabilities(&request.model).supports_streaming {
            let response = tokio::select! {
                biased;
                _ = round.cancel.cancelled() => return Err(TurnError::Canceled),
                response = self.client.generate(request) => response?,
            };
            for event in response_events(response) {
                session.on_event(&event, output)?;
            }
            return Ok(());
        }

        let mut stream = tokio::select! {
            biased;
            _ = round.cancel.cancelled() => return Err(TurnError::Canceled),
            stream = self.client.stream(request) => stream?,
        };
        let idle = self.config.runner.stream_idle_timeout();
        loop {
            let next = tokio::select! {
                biased;
                _ = round.cancel.cancelled() => return Err(TurnError::Canceled),
                next = next_event(&mut stream, idle) => next?,
            };
            let Some(event) = next else {
                break;
            };
            session.on_event(&event, output)?;
            if event.event_type == StreamEventType::Done {
                break;
            }
        }
        Ok(())
    }

    fn extract_fallback(&self, session: &DispatchSession, output: &GenerateOutput) {
        match extract_plan(&output.content, output.response_id.as_deref()) {
            Ok(extracted) if !extracted.is_empty() => {
                let appended = session.merge_plan(extracted);
                tracing::debug!(session = %session.id(), appended, "plan extracted from content");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(session = %session.id(), error = %e, "fallback plan extraction failed"),
        }
    }

    /// Classify a failed model call.
    async fn fail(
        &self,
        round: &mut RoundContext,
        input: &GenerateInput,
        continuation: bool,
        error: TurnError,
        emitter: &EventEmitter,
    ) -> TurnError {
        let error = if !error.is_context_overflow() {
            error
        } else if continuation {
            TurnError::ContinuationContextLimit {
                message: error.to_string(),
            }
        } else if !round.recovery_attempted {
            round.recovery_attempted = true;
            let message = overflow_message(&error);
            RecoveryEngine::new(self)
                .present_context_limit_exceeded(round, input, &message)
                .await
        } else {
            error
        };
        emitter.emit(TurnEventPayload::RoundFailed {
            round: round.round,
            error: error.to_string(),
        });
        error
    }
}

impl std::fmt::Debug for PlanRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanRunner")
            .field("client", &self.client.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Raw provider text of an overflow error.
fn overflow_message(error: &TurnError) -> String {
    match error {
        TurnError::ContextLimitExceeded { message }
        | TurnError::ContinuationContextLimit { message }
        | TurnError::Stream(message)
        | TurnError::Provider { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

async fn next_event(
    stream: &mut ModelEventStream,
    idle: Duration,
) -> Result<Option<ModelEvent>, TurnError> {
    let next = if idle.is_zero() {
        stream.next().await
    } else {
        tokio::time::timeout(idle, stream.next())
            .await
            .map_err(|_| TurnError::Timeout(idle.as_millis() as u64))?
    };
    next.transpose()
}

/// Reserved for de-duplication policy; currently leaves the plan untouched.
fn refine_plan(_plan: &mut Plan) {}
