//! Duplicate tool call suppression.
//!
//! Autonomous tool loops tend to re-issue the exact same call. The guard keeps
//! two views of recent calls:
//!
//! * the active streak of identical signatures, blocked at the second repeat
//!   for pure-success streaks and at the third once any call in the streak
//!   errored (one retry-after-error is always allowed);
//! * a bounded window of recent signatures, blocking any signature that
//!   occurs `window_threshold` times inside it regardless of adjacency.
//!
//! State is round-local and owned by the dispatcher.

pub mod signature;

pub use signature::{canonical_json, signature};

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::plan::{ToolArgs, ToolCallRecord};

/// Tuning for the frequency window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Number of most recent signatures kept.
    pub window_size: usize,
    /// Occurrences inside the window (current call included) that trigger a block.
    pub window_threshold: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window_size: 12,
            window_threshold: 4,
        }
    }
}

/// Why a call was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Identical to the immediately preceding calls.
    ConsecutiveRepeat { count: usize },
    /// Recurring too often inside the recent window.
    FrequentRepeat { occurrences: usize },
}

/// Outcome of [`DuplicateGuard::should_block`].
#[derive(Debug, Clone, PartialEq)]
pub struct GuardVerdict {
    pub blocked: bool,
    pub reason: Option<BlockReason>,
    /// Last successful result for the same signature, if any.
    pub prior: Option<ToolCallRecord>,
    pub signature: String,
}

/// Tracks recent tool call signatures and blocks pathological repetition.
#[derive(Debug, Clone)]
pub struct DuplicateGuard {
    config: GuardConfig,
    enabled: bool,
    last_signature: Option<String>,
    consecutive: usize,
    streak_errored: bool,
    window: VecDeque<String>,
    successes: HashMap<String, ToolCallRecord>,
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl DuplicateGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            enabled: true,
            last_signature: None,
            consecutive: 0,
            streak_errored: false,
            window: VecDeque::with_capacity(config.window_size),
            successes: HashMap::new(),
        }
    }

    /// A guard whose state reflects `seed` as if those calls had just occurred, in order.
    pub fn with_seed(config: GuardConfig, seed: &[ToolCallRecord]) -> Self {
        let mut guard = Self::new(config);
        for record in seed {
            let sig = signature(&record.name, &record.arguments);
            guard.observe(&sig);
            guard.record(&sig, record);
        }
        guard
    }

    /// A guard that tracks calls but never blocks (recovery mode).
    pub fn disabled(config: GuardConfig) -> Self {
        let mut guard = Self::new(config);
        guard.enabled = false;
        guard
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count this call and decide whether it must be suppressed.
    pub fn should_block(&mut self, name: &str, args: &ToolArgs) -> GuardVerdict {
        let sig = signature(name, args);
        let occurrences = self.observe(&sig);

        let streak_limit = if self.streak_errored { 3 } else { 2 };
        let reason = if self.consecutive >= streak_limit {
            Some(BlockReason::ConsecutiveRepeat {
                count: self.consecutive,
            })
        } else if self.config.window_threshold > 0 && occurrences >= self.config.window_threshold {
            Some(BlockReason::FrequentRepeat { occurrences })
        } else {
            None
        };

        let blocked = self.enabled && reason.is_some();
        GuardVerdict {
            blocked,
            reason: reason.filter(|_| blocked),
            prior: if blocked {
                self.successes.get(&sig).cloned()
            } else {
                None
            },
            signature: sig,
        }
    }

    /// Record the outcome of an executed call.
    pub fn register_result(&mut self, name: &str, args: &ToolArgs, result: &ToolCallRecord) {
        let sig = signature(name, args);
        self.record(&sig, result);
    }

    /// Last successful result for a call, if one was registered.
    pub fn prior_success(&self, name: &str, args: &ToolArgs) -> Option<&ToolCallRecord> {
        self.successes.get(&signature(name, args))
    }

    /// Update streak and window; returns occurrences of `sig` in the window.
    fn observe(&mut self, sig: &str) -> usize {
        if self.last_signature.as_deref() == Some(sig) {
            self.consecutive += 1;
        } else {
            self.last_signature = Some(sig.to_string());
            self.consecutive = 1;
            self.streak_errored = false;
        }

        if self.config.window_size > 0 {
            if self.window.len() == self.config.window_size {
                self.window.pop_front();
            }
            self.window.push_back(sig.to_string());
        }
        self.window.iter().filter(|s| s.as_str() == sig).count()
    }

    fn record(&mut self, sig: &str, result: &ToolCallRecord) {
        if self.last_signature.as_deref() == Some(sig) && result.is_error() {
            self.streak_errored = true;
        }
        if !result.is_error() {
            self.successes.insert(sig.to_string(), result.clone());
        }
    }
}
