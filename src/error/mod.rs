//! Error types for turnwise.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion, TurnFailure};

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Primary error type for all turn orchestration operations.
#[derive(Error, Debug)]
pub enum TurnError {
    /// The provider rejected the request because it does not fit the context window.
    #[error("Context limit exceeded: {message}")]
    ContextLimitExceeded { message: String },

    /// Overflow while serving an anchored (delta) continuation request.
    #[error("Continuation context limit exceeded: {message}")]
    ContinuationContextLimit { message: String },

    /// History was reduced after an overflow; the caller should retry the original request.
    #[error("Context limit exceeded, history reduced: {summary}")]
    ContextLimitRecovered { summary: String },

    #[error("Context limit exceeded and could not be recovered: {message}")]
    ContextLimitUnrecoverable { message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Plan decoding error: {0}")]
    PlanDecoding(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Conversation store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Round canceled")]
    Canceled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn overflow_text_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(maximum context length|context_length_exceeded|context window|prompt is too long|too many tokens|input is too long)",
        )
        .expect("overflow text regex must compile")
    })
}

impl TurnError {
    /// Build the overflow sentinel from raw provider text.
    pub fn context_limit(message: impl Into<String>) -> Self {
        Self::ContextLimitExceeded {
            message: message.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Error reported inside a model stream. Overflow text becomes the
    /// overflow sentinel so it is handled like a rejected request.
    pub fn stream_error(message: impl Into<String>) -> Self {
        let message = message.into();
        if overflow_text_pattern().is_match(&message) {
            Self::ContextLimitExceeded { message }
        } else {
            Self::Stream(message)
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ContextLimitExceeded { .. }
            | Self::ContinuationContextLimit { .. }
            | Self::ContextLimitRecovered { .. }
            | Self::ContextLimitUnrecoverable { .. } => ErrorCategory::ContextOverflow,
            Self::Provider { message, .. } | Self::Stream(message)
                if overflow_text_pattern().is_match(message) =>
            {
                ErrorCategory::ContextOverflow
            }
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) | Self::Stream(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::PlanDecoding(_) | Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Store,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Canceled => ErrorCategory::Canceled,
            Self::InvalidArgument(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the provider reported that the request does not fit the context window.
    ///
    /// Only the raw sentinel (and provider or stream errors carrying overflow
    /// text) match; the already-classified recovery outcomes do not.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Self::ContextLimitExceeded { .. } | Self::ContinuationContextLimit { .. } => true,
            Self::Provider { message, .. } | Self::Stream(message) => {
                overflow_text_pattern().is_match(message)
            }
            _ => false,
        }
    }

    /// Whether this error is potentially retryable by the provider collaborator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Timeout
        )
    }

    /// Caller-facing classification of a failed round.
    pub fn failure(&self) -> TurnFailure {
        match self {
            Self::ContextLimitRecovered { .. } => TurnFailure::ContextLimitRecovered,
            Self::ContextLimitUnrecoverable { .. }
            | Self::ContextLimitExceeded { .. }
            | Self::ContinuationContextLimit { .. } => TurnFailure::ContextLimitUnrecoverable,
            Self::ToolExecution { .. } => TurnFailure::ToolExecutionFailed,
            _ => TurnFailure::Other,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            Self::ContextLimitRecovered { .. } => RecoverySuggestion::RetryRequest,
            _ => match self.category() {
                ErrorCategory::ContextOverflow => RecoverySuggestion::ReduceInputSize,
                ErrorCategory::RateLimit | ErrorCategory::Network => {
                    RecoverySuggestion::RetryWithBackoff
                }
                ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
                ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
                ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
                _ => RecoverySuggestion::SurfaceToUser,
            },
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TurnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_text_is_recognised_as_overflow() {
        let err = TurnError::provider(
            "openai",
            "This model's maximum context length is 8000 tokens. However, you requested 9000 tokens",
        );
        assert!(err.is_context_overflow());
        assert_eq!(err.category(), ErrorCategory::ContextOverflow);
        assert!(!err.is_retryable());
    }

    #[test]
    fn streamed_overflow_text_becomes_the_sentinel() {
        let err = TurnError::stream_error("prompt is too long: 210000 tokens > 200000 maximum");
        assert!(matches!(err, TurnError::ContextLimitExceeded { .. }));

        let err = TurnError::stream_error("upstream connection reset");
        assert!(matches!(err, TurnError::Stream(_)));
        assert!(!err.is_context_overflow());
        assert!(err.is_retryable());

        let raw = TurnError::Stream("context_length_exceeded".into());
        assert!(raw.is_context_overflow());
        assert!(!raw.is_retryable());
    }

    #[test]
    fn recovered_overflow_is_not_a_fresh_overflow() {
        let err = TurnError::ContextLimitRecovered {
            summary: "removed 3 messages".into(),
        };
        assert!(!err.is_context_overflow());
        assert_eq!(err.failure(), TurnFailure::ContextLimitRecovered);
        assert_eq!(err.recovery_suggestion(), RecoverySuggestion::RetryRequest);
    }

    #[test]
    fn tool_failures_classify_as_hard() {
        let err = TurnError::ToolExecution {
            tool_name: "search".into(),
            message: "boom".into(),
        };
        assert_eq!(err.failure(), TurnFailure::ToolExecutionFailed);
    }
}
