//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ContextOverflow,
    ToolExecution,
    Provider,
    RateLimit,
    Network,
    Timeout,
    Serialization,
    Store,
    Configuration,
    Canceled,
    Unknown,
}

/// How a failed round should be presented by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnFailure {
    /// Soft: history was reduced, retry the original request.
    ContextLimitRecovered,
    /// Hard: surface as a turn failure.
    ContextLimitUnrecoverable,
    /// Hard: first tool-execution failure of the round.
    ToolExecutionFailed,
    Other,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryRequest,
    RetryWithBackoff,
    ReduceInputSize,
    IncreaseTimeout,
    CheckConfiguration,
    CheckToolImplementation,
    SurfaceToUser,
}
