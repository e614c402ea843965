//! Overflow sizing and committed-history pruning.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{GenerateInput, GenerateRequest, Role};
use crate::util::TokenEstimator;

fn overflow_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)maximum context length is\s+([\d,]+).*?requested\s+([\d,]+)")
            .expect("overflow size regex must compile")
    })
}

fn parse_count(raw: &str) -> Option<usize> {
    raw.replace(',', "").parse().ok()
}

/// Tokens by which a request exceeded the window, when the provider says so
/// ("maximum context length is X … requested Y" gives `Y - X`).
pub fn parse_overflow_tokens(message: &str) -> Option<usize> {
    let captures = overflow_pattern().captures(message)?;
    let limit = parse_count(captures.get(1)?.as_str())?;
    let requested = parse_count(captures.get(2)?.as_str())?;
    requested.checked_sub(limit).filter(|deficit| *deficit > 0)
}

/// Estimated tokens saved by sending `constrained` instead of `original`.
///
/// Zero when `constrained` is not smaller.
pub fn estimated_savings(
    estimator: &dyn TokenEstimator,
    original: &GenerateRequest,
    constrained: &GenerateRequest,
) -> usize {
    match original
        .content_bytes()
        .saturating_sub(constrained.content_bytes())
    {
        0 => 0,
        delta => estimator.estimate_len(delta),
    }
}

/// Drop the oldest committed user messages until `deficit` estimated tokens
/// are freed.
///
/// Messages of the in-flight turn (`input.turn_id`) and the most recent user
/// message are never dropped. Returns the estimated tokens freed.
pub fn prune_committed_user_messages(
    input: &mut GenerateInput,
    deficit: usize,
    estimator: &dyn TokenEstimator,
) -> usize {
    let latest_user = input.messages.iter().rposition(|m| m.role == Role::User);
    let in_flight = input.turn_id.clone();

    let mut freed = 0usize;
    let mut dropped = vec![false; input.messages.len()];
    for (index, message) in input.messages.iter().enumerate() {
        if freed >= deficit {
            break;
        }
        let committed = in_flight.is_none() || message.turn_id != in_flight;
        if message.role == Role::User && committed && Some(index) != latest_user {
            freed += estimator.estimate_len(message.content_bytes());
            dropped[index] = true;
        }
    }

    let mut index = 0;
    input.messages.retain(|_| {
        let keep = !dropped[index];
        index += 1;
        keep
    });
    freed
}
