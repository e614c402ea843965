//! Per-round stream dispatch.
//!
//! A [`DispatchSession`] is opened by the runner at round start and consumed
//! at round end. Every model event is folded into the round's [`Plan`]; tool
//! steps not yet dispatched are launched as tracked tasks. The plan, the
//! dispatch cursor and the duplicate guard share one mutex that is never held
//! across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::error::TurnError;
use crate::events::{EventEmitter, TurnEventPayload};
use crate::guard::{BlockReason, DuplicateGuard, GuardConfig};
use crate::plan::{extend_plan_with_tool_calls, Plan, Step, StepType, ToolCallRecord};
use crate::store::{ConversationStore, StoredMessage, StoredToolCall};
use crate::tools::{ToolExecutionContext, ToolRegistry};
use crate::types::{GenerateInput, GenerateOutput, ModelEvent, StreamEventType, ToolCallChunk};
use crate::util::timeout::with_timeout;

/// Shared collaborators from which per-round sessions are opened.
#[derive(Clone)]
pub struct StreamDispatcher {
    tools: Arc<dyn ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    guard_config: GuardConfig,
    tool_timeout: Duration,
}

impl StreamDispatcher {
    pub fn new(tools: Arc<dyn ToolRegistry>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            tools,
            store,
            guard_config: GuardConfig::default(),
            tool_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_guard_config(mut self, config: GuardConfig) -> Self {
        self.guard_config = config;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Start a round for `input`.
    ///
    /// Outside recovery mode the guard is seeded with the input's prior tool
    /// calls; in recovery mode it never blocks.
    pub fn open(
        &self,
        input: &GenerateInput,
        recovery_mode: bool,
        emitter: EventEmitter,
    ) -> DispatchSession {
        let guard = if recovery_mode {
            DuplicateGuard::disabled(self.guard_config)
        } else {
            DuplicateGuard::with_seed(self.guard_config, &input.prior_tool_calls)
        };
        let id = Uuid::new_v4();
        let (errors_tx, errors_rx) = mpsc::channel(1);
        tracing::debug!(session = %id, recovery_mode, "dispatch session opened");

        DispatchSession {
            id,
            shared: Arc::new(Shared {
                session: id,
                tools: Arc::clone(&self.tools),
                store: Arc::clone(&self.store),
                conversation_id: input.conversation_id.clone(),
                turn_id: input.turn_id.clone(),
                tool_timeout: self.tool_timeout,
                recovery_mode,
                emitter,
                errors: errors_tx,
            }),
            state: Arc::new(Mutex::new(DispatchState {
                plan: Plan::new(),
                cursor: 0,
                guard,
                in_flight: HashMap::new(),
                records: Vec::new(),
            })),
            tracker: TaskTracker::new(),
            errors: errors_rx,
        }
    }
}

impl std::fmt::Debug for StreamDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDispatcher")
            .field("guard_config", &self.guard_config)
            .field("tool_timeout", &self.tool_timeout)
            .finish_non_exhaustive()
    }
}

struct DispatchState {
    plan: Plan,
    /// Index of the first step not yet dispatched.
    cursor: usize,
    guard: DuplicateGuard,
    /// Latest executing call per signature; resolves to its record.
    in_flight: HashMap<String, watch::Receiver<Option<ToolCallRecord>>>,
    /// Completed records, in completion order.
    records: Vec<ToolCallRecord>,
}

/// What to do with a freshly dispatched step.
enum Action {
    Execute(watch::Sender<Option<ToolCallRecord>>),
    Reuse(ToolCallRecord),
    AwaitInFlight(watch::Receiver<Option<ToolCallRecord>>),
    Refuse(Option<BlockReason>),
}

struct Shared {
    session: Uuid,
    tools: Arc<dyn ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    conversation_id: String,
    turn_id: Option<String>,
    tool_timeout: Duration,
    recovery_mode: bool,
    emitter: EventEmitter,
    errors: mpsc::Sender<TurnError>,
}

/// Result of a finished round of dispatch.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub plan: Plan,
    pub records: Vec<ToolCallRecord>,
    /// First hard failure reported by a tool task, if any.
    pub first_error: Option<TurnError>,
}

/// One round's dispatch state. Dropping it stops accepting new tasks; tasks
/// already running complete on their own.
pub struct DispatchSession {
    id: Uuid,
    shared: Arc<Shared>,
    state: Arc<Mutex<DispatchState>>,
    tracker: TaskTracker,
    errors: mpsc::Receiver<TurnError>,
}

fn lock(state: &Mutex<DispatchState>) -> MutexGuard<'_, DispatchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DispatchSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fold one model event into the output and the plan.
    pub fn on_event(&self, event: &ModelEvent, output: &mut GenerateOutput) -> Result<(), TurnError> {
        if let Some(response_id) = &event.response_id {
            output.response_id = Some(response_id.clone());
        }
        match event.event_type {
            StreamEventType::TextDelta | StreamEventType::Finish => {
                if !event.text.is_empty() {
                    output.content.push_str(&event.text);
                    self.shared.emitter.emit(TurnEventPayload::ContentDelta {
                        text: event.text.clone(),
                    });
                }
                if event.finish_reason.is_some() {
                    output.finish_reason = event.finish_reason;
                }
            }
            StreamEventType::Error => return Err(TurnError::stream_error(event.text.clone())),
            StreamEventType::ToolCallDelta | StreamEventType::Done => {}
        }
        if let Some(usage) = &event.usage {
            output.usage.merge(usage);
        }
        if !event.tool_calls.is_empty() {
            let response_id = event.response_id.as_deref().or(output.response_id.as_deref());
            self.extend(&event.tool_calls, response_id);
        }
        Ok(())
    }

    /// Merge tool calls into the plan and dispatch new steps. Returns the
    /// number of appended steps.
    pub fn extend(&self, calls: &[ToolCallChunk], response_id: Option<&str>) -> usize {
        let mut state = lock(&self.state);
        let appended = extend_plan_with_tool_calls(&mut state.plan, calls, response_id);
        self.dispatch_pending(&mut state);
        appended
    }

    /// Merge a plan extracted from raw content; its steps dispatch like streamed ones.
    pub fn merge_plan(&self, extracted: Plan) -> usize {
        let mut state = lock(&self.state);
        let mut appended = 0;
        for step in extracted.steps {
            if state.plan.step(&step.id).is_none() {
                state.plan.steps.push(step);
                appended += 1;
            }
        }
        if state.plan.elicitation.is_none() {
            state.plan.elicitation = extracted.elicitation;
        }
        self.dispatch_pending(&mut state);
        appended
    }

    /// Snapshot of the plan as it stands.
    pub fn plan(&self) -> Plan {
        lock(&self.state).plan.clone()
    }

    /// Wait until every task dispatched so far has finished. The session keeps
    /// accepting steps afterwards.
    pub async fn barrier(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Wait for all tasks and hand back the round's plan, records and first error.
    pub async fn finish(mut self) -> DispatchOutcome {
        self.tracker.close();
        self.tracker.wait().await;
        let first_error = self.errors.try_recv().ok();
        let (plan, records) = {
            let mut state = lock(&self.state);
            (
                std::mem::take(&mut state.plan),
                std::mem::take(&mut state.records),
            )
        };
        tracing::debug!(
            session = %self.id,
            steps = plan.steps.len(),
            records = records.len(),
            failed = first_error.is_some(),
            "dispatch session finished"
        );
        DispatchOutcome {
            plan,
            records,
            first_error,
        }
    }

    fn dispatch_pending(&self, state: &mut DispatchState) {
        while state.cursor < state.plan.steps.len() {
            let step = state.plan.steps[state.cursor].clone();
            state.cursor += 1;
            self.shared.emitter.emit(TurnEventPayload::StepAdded {
                step_id: step.id.clone(),
                name: step.name.clone(),
            });
            if step.step_type != StepType::Tool {
                continue;
            }

            let verdict = state.guard.should_block(&step.name, &step.args);
            let action = if !verdict.blocked {
                let (tx, rx) = watch::channel(None);
                state.in_flight.insert(verdict.signature.clone(), rx);
                Action::Execute(tx)
            } else if let Some(prior) = verdict.prior {
                Action::Reuse(prior)
            } else if let Some(rx) = state.in_flight.get(&verdict.signature) {
                Action::AwaitInFlight(rx.clone())
            } else {
                Action::Refuse(verdict.reason)
            };

            if verdict.blocked {
                tracing::warn!(
                    session = %self.id,
                    tool = %step.name,
                    call_id = %step.id,
                    signature = %verdict.signature,
                    reason = ?verdict.reason,
                    "repeated tool call blocked"
                );
            }

            let shared = Arc::clone(&self.shared);
            let task_state = Arc::clone(&self.state);
            self.tracker.spawn(async move {
                shared.run_step(&task_state, step, action).await;
            });
        }
    }
}

impl Drop for DispatchSession {
    fn drop(&mut self) {
        self.tracker.close();
    }
}

impl std::fmt::Debug for DispatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSession")
            .field("id", &self.id)
            .field("recovery_mode", &self.shared.recovery_mode)
            .field("tasks", &self.tracker.len())
            .finish()
    }
}

impl Shared {
    async fn run_step(&self, state: &Mutex<DispatchState>, step: Step, action: Action) {
        match action {
            Action::Execute(done) => {
                let record = self.execute(state, &step).await;
                done.send_replace(Some(record.clone()));
                self.persist_call(&step, &record).await;
                self.complete(state, record);
            }
            Action::Reuse(prior) => self.reuse(state, &step, prior).await,
            Action::AwaitInFlight(mut rx) => {
                let earlier = rx.wait_for(Option::is_some).await.ok().and_then(|r| (*r).clone());
                match earlier {
                    Some(record) if !record.is_error() => self.reuse(state, &step, record).await,
                    // The identical call failed; one retry after an error is allowed.
                    Some(_) => {
                        let record = self.execute(state, &step).await;
                        self.persist_call(&step, &record).await;
                        self.complete(state, record);
                    }
                    None => self.refuse(state, &step, None).await,
                }
            }
            Action::Refuse(reason) => self.refuse(state, &step, reason).await,
        }
    }

    /// Run the tool and register the outcome with the guard.
    async fn execute(&self, state: &Mutex<DispatchState>, step: &Step) -> ToolCallRecord {
        self.emitter.emit(TurnEventPayload::ToolStarted {
            call_id: step.id.clone(),
            name: step.name.clone(),
        });
        let ctx = ToolExecutionContext {
            conversation_id: self.conversation_id.clone(),
            turn_id: self.turn_id.clone(),
            call_id: step.id.clone(),
            metadata: serde_json::Value::Null,
        };
        let outcome = with_timeout(
            self.tool_timeout,
            self.tools.execute(&step.name, &step.args, &ctx),
        )
        .await;

        let record = match outcome {
            Ok(result) => ToolCallRecord::success(&step.name, step.args.clone(), result),
            Err(e) => {
                tracing::warn!(
                    session = %self.session,
                    tool = %step.name,
                    call_id = %step.id,
                    error = %e,
                    "tool execution failed"
                );
                ToolCallRecord::failure(&step.name, step.args.clone(), e.to_string())
            }
        }
        .with_call_id(&step.id);

        lock(state)
            .guard
            .register_result(&step.name, &step.args, &record);
        record
    }

    /// Answer a blocked call with the earlier successful result.
    async fn reuse(&self, state: &Mutex<DispatchState>, step: &Step, prior: ToolCallRecord) {
        self.emitter.emit(TurnEventPayload::ToolBlocked {
            call_id: step.id.clone(),
            name: step.name.clone(),
            reused_prior: true,
        });
        let record = ToolCallRecord {
            call_id: step.id.clone(),
            ..prior
        };
        self.append_result(step, &record).await;
        self.complete(state, record);
    }

    /// Answer a blocked call that has nothing to reuse with an error result.
    async fn refuse(&self, state: &Mutex<DispatchState>, step: &Step, reason: Option<BlockReason>) {
        self.emitter.emit(TurnEventPayload::ToolBlocked {
            call_id: step.id.clone(),
            name: step.name.clone(),
            reused_prior: false,
        });
        let detail = match reason {
            Some(BlockReason::ConsecutiveRepeat { count }) => {
                format!("identical call issued {count} times in a row")
            }
            Some(BlockReason::FrequentRepeat { occurrences }) => {
                format!("identical call issued {occurrences} times in recent history")
            }
            None => "identical call already attempted".to_string(),
        };
        let record = ToolCallRecord::failure(
            &step.name,
            step.args.clone(),
            format!("blocked as repetitive: {detail}; use the earlier result or change the arguments"),
        )
        .with_call_id(&step.id);
        self.append_result(step, &record).await;
        self.complete(state, record);
    }

    fn complete(&self, state: &Mutex<DispatchState>, record: ToolCallRecord) {
        lock(state).records.push(record.clone());
        self.emitter
            .emit(TurnEventPayload::ToolCompleted { record });
    }

    async fn persist_call(&self, step: &Step, record: &ToolCallRecord) {
        let call = StoredToolCall::from_record(record, step.response_id.as_deref());
        if let Err(e) = self
            .store
            .record_tool_call(&self.conversation_id, self.turn_id.as_deref(), call)
            .await
        {
            self.report(TurnError::ToolExecution {
                tool_name: step.name.clone(),
                message: format!("failed to persist tool call {}: {e}", step.id),
            });
        }
    }

    async fn append_result(&self, step: &Step, record: &ToolCallRecord) {
        let mut message = StoredMessage::tool_result(record, step.response_id.as_deref());
        message.turn_id = self.turn_id.clone();
        if let Err(e) = self
            .store
            .append_message(&self.conversation_id, message)
            .await
        {
            self.report(TurnError::ToolExecution {
                tool_name: step.name.clone(),
                message: format!("failed to persist synthesized result for {}: {e}", step.id),
            });
        }
    }

    /// Hand a hard failure to the runner; only the first one is kept.
    fn report(&self, error: TurnError) {
        if self.recovery_mode {
            tracing::warn!(session = %self.session, error = %error, "tool failure ignored in recovery mode");
            return;
        }
        match self.errors.try_send(error) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(error))
            | Err(mpsc::error::TrySendError::Closed(error)) => {
                tracing::warn!(session = %self.session, error = %error, "additional tool failure not surfaced");
            }
        }
    }
}
