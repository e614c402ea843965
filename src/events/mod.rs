//! Turn event stream for observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::ToolCallRecord;

/// Callback receiving every emitted event, in sequence order per emitter.
pub type TurnEventSink = Arc<dyn Fn(TurnEvent) + Send + Sync>;

/// Concrete event payloads emitted while serving a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEventPayload {
    RoundStarted {
        round: usize,
        recovery_mode: bool,
    },
    RoundCompleted {
        round: usize,
        steps: usize,
    },
    RoundFailed {
        round: usize,
        error: String,
    },
    ContentDelta {
        text: String,
    },
    StepAdded {
        step_id: String,
        name: String,
    },
    ToolStarted {
        call_id: String,
        name: String,
    },
    /// A call suppressed by the duplicate guard.
    ToolBlocked {
        call_id: String,
        name: String,
        reused_prior: bool,
    },
    ToolCompleted {
        record: ToolCallRecord,
    },
    RecoveryStarted {
        mode: String,
        candidates: usize,
        overflow_tokens: Option<usize>,
    },
    RecoveryCompleted {
        summary: String,
    },
    RecoveryFailed {
        error: String,
    },
}

/// Envelope for turn events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    pub conversation_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: TurnEventPayload,
}

/// Stamps payloads with a sequence number and forwards them to the sink.
///
/// Clones share the sequence counter, so events from concurrent tool tasks
/// stay totally ordered.
#[derive(Clone, Default)]
pub struct EventEmitter {
    conversation_id: String,
    seq: Arc<AtomicU64>,
    sink: Option<TurnEventSink>,
}

impl EventEmitter {
    pub fn new(conversation_id: impl Into<String>, sink: Option<TurnEventSink>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            seq: Arc::new(AtomicU64::new(1)),
            sink,
        }
    }

    pub fn emit(&self, payload: TurnEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(TurnEvent {
            conversation_id: self.conversation_id.clone(),
            seq,
            timestamp: Utc::now(),
            payload,
        });
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("conversation_id", &self.conversation_id)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
