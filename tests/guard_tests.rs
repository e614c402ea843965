//! Duplicate guard behaviour across streaks and the recent window.

use serde_json::json;

use turnwise::guard::{canonical_json, signature, BlockReason, DuplicateGuard, GuardConfig};
use turnwise::plan::{ToolArgs, ToolCallRecord};

fn args(value: serde_json::Value) -> ToolArgs {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn signatures_ignore_key_order_at_every_depth() {
    let a = args(json!({"q": "x", "opts": {"limit": 5, "sort": ["a", "b"], "deep": {"z": 1, "y": 2}}}));
    let b = args(json!({"opts": {"deep": {"y": 2, "z": 1}, "sort": ["a", "b"], "limit": 5}, "q": "x"}));
    assert_eq!(signature("search", &a), signature("search", &b));
    assert_eq!(
        canonical_json(&serde_json::Value::Object(a)),
        canonical_json(&serde_json::Value::Object(b))
    );
}

#[test]
fn signatures_distinguish_name_and_array_order() {
    let a = args(json!({"ids": [1, 2]}));
    let b = args(json!({"ids": [2, 1]}));
    assert_ne!(signature("fetch", &a), signature("fetch", &b));
    assert_ne!(signature("fetch", &a), signature("load", &a));
}

#[test]
fn seeded_success_blocks_the_next_identical_call() {
    let a = args(json!({"q": "x"}));
    let seed = vec![ToolCallRecord::success("search", a.clone(), "hits").with_call_id("c0")];
    let mut guard = DuplicateGuard::with_seed(GuardConfig::default(), &seed);

    let verdict = guard.should_block("search", &a);
    assert!(verdict.blocked);
    assert_eq!(verdict.prior.expect("prior").result, "hits");
}

#[test]
fn seeded_error_allows_one_retry() {
    let a = args(json!({"path": "/etc/hosts"}));
    let seed = vec![ToolCallRecord::failure("read", a.clone(), "EACCES")];
    let mut guard = DuplicateGuard::with_seed(GuardConfig::default(), &seed);

    assert!(!guard.should_block("read", &a).blocked);
    guard.register_result("read", &a, &ToolCallRecord::failure("read", a.clone(), "EACCES"));
    assert!(guard.should_block("read", &a).blocked);
}

#[test]
fn divergent_call_resets_the_streak() {
    let a = args(json!({"q": "x"}));
    let b = args(json!({"q": "y"}));
    let mut guard = DuplicateGuard::default();

    assert!(!guard.should_block("search", &a).blocked);
    guard.register_result("search", &a, &ToolCallRecord::success("search", a.clone(), "x"));
    assert!(!guard.should_block("search", &b).blocked);
    guard.register_result("search", &b, &ToolCallRecord::success("search", b.clone(), "y"));

    let verdict = guard.should_block("search", &a);
    assert!(!verdict.blocked, "A, B, A is not a streak");
}

#[test]
fn frequent_signature_is_blocked_inside_the_window() {
    let recurring = args(json!({"q": "again"}));
    let mut guard = DuplicateGuard::default();
    let mut blocked_at = None;

    for i in 0..12 {
        let verdict = if i % 3 == 0 {
            guard.should_block("search", &recurring)
        } else {
            guard.should_block("search", &args(json!({"q": i})))
        };
        if verdict.blocked {
            blocked_at = Some((i, verdict.reason));
            break;
        }
    }

    assert_eq!(
        blocked_at,
        Some((9, Some(BlockReason::FrequentRepeat { occurrences: 4 })))
    );
}

#[test]
fn rare_signature_is_never_blocked() {
    let rare = args(json!({"q": "rare"}));
    let mut guard = DuplicateGuard::default();

    for i in 0..100 {
        let verdict = if i % 13 == 0 {
            guard.should_block("search", &rare)
        } else {
            guard.should_block("search", &args(json!({"q": i})))
        };
        assert!(!verdict.blocked, "call {i} blocked");
    }
}

#[test]
fn custom_window_applies() {
    let config = GuardConfig {
        window_size: 4,
        window_threshold: 2,
    };
    let a = args(json!({"n": 0}));
    let mut guard = DuplicateGuard::new(config);

    assert!(!guard.should_block("t", &a).blocked);
    assert!(!guard.should_block("t", &args(json!({"n": 1}))).blocked);
    assert!(guard.should_block("t", &a).blocked);
}
