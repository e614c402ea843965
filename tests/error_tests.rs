//! Tests for the error system.

use turnwise::error::*;

#[test]
fn error_display_is_stable() {
    let err = TurnError::ToolExecution {
        tool_name: "search".into(),
        message: "index offline".into(),
    };
    assert_eq!(err.to_string(), "Tool execution error: search: index offline");
    assert_eq!(
        TurnError::context_limit("too big").to_string(),
        "Context limit exceeded: too big"
    );
}

#[test]
fn error_helper_mappings_are_stable_for_major_variants() {
    struct Case {
        error: TurnError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
        expected_recovery: RecoverySuggestion,
    }

    let cases = vec![
        Case {
            error: TurnError::RateLimited {
                retry_after_ms: Some(1000),
            },
            expected_category: ErrorCategory::RateLimit,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: TurnError::Timeout(5000),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::IncreaseTimeout,
        },
        Case {
            error: TurnError::Configuration("bad-config".into()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckConfiguration,
        },
        Case {
            error: TurnError::Network("reset".into()),
            expected_category: ErrorCategory::Network,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryWithBackoff,
        },
        Case {
            error: TurnError::context_limit("maximum context length is 10"),
            expected_category: ErrorCategory::ContextOverflow,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ReduceInputSize,
        },
        Case {
            error: TurnError::ContextLimitRecovered {
                summary: "removed 2".into(),
            },
            expected_category: ErrorCategory::ContextOverflow,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::RetryRequest,
        },
        Case {
            error: TurnError::ToolExecution {
                tool_name: "x".into(),
                message: "y".into(),
            },
            expected_category: ErrorCategory::ToolExecution,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckToolImplementation,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.expected_category, "{}", case.error);
        assert_eq!(case.error.is_retryable(), case.expected_retryable, "{}", case.error);
        assert_eq!(
            case.error.recovery_suggestion(),
            case.expected_recovery,
            "{}",
            case.error
        );
    }
}

#[test]
fn provider_overflow_text_is_recognised() {
    let err = TurnError::provider("openai", "This model's maximum context length is 8192 tokens");
    assert!(err.is_context_overflow());
    assert_eq!(err.category(), ErrorCategory::ContextOverflow);

    let other = TurnError::provider("openai", "invalid api key");
    assert!(!other.is_context_overflow());
    assert_eq!(other.category(), ErrorCategory::Provider);
}

#[test]
fn classified_outcomes_are_not_raw_overflows() {
    let recovered = TurnError::ContextLimitRecovered {
        summary: "done".into(),
    };
    assert!(!recovered.is_context_overflow());
    assert_eq!(recovered.failure(), TurnFailure::ContextLimitRecovered);

    let unrecoverable = TurnError::ContextLimitUnrecoverable {
        message: "still too big".into(),
    };
    assert!(!unrecoverable.is_context_overflow());
    assert_eq!(unrecoverable.failure(), TurnFailure::ContextLimitUnrecoverable);
}
