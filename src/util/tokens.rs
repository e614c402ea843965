//! Approximate token accounting used for relative sizing decisions.

/// Strategy for estimating token cost. Never used for provider-exact accounting.
pub trait TokenEstimator: Send + Sync {
    /// Estimated tokens for a payload of `len` bytes.
    fn estimate_len(&self, len: usize) -> usize;

    /// Estimated tokens for `text`.
    fn estimate(&self, text: &str) -> usize {
        self.estimate_len(text.len())
    }
}

/// Byte-length heuristic: under 8 bytes (empty included) costs one token,
/// otherwise `ceil(len / 4)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate_len(&self, len: usize) -> usize {
        match len {
            0..=7 => 1,
            _ => len.div_ceil(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payloads_cost_one_token() {
        let estimator = HeuristicEstimator;
        assert_eq!(estimator.estimate(""), 1);
        assert_eq!(estimator.estimate("a"), 1);
        assert_eq!(estimator.estimate("1234567"), 1);
    }

    #[test]
    fn longer_payloads_round_up() {
        let estimator = HeuristicEstimator;
        assert_eq!(estimator.estimate("12345678"), 2);
        assert_eq!(estimator.estimate("123456789"), 3);
        assert_eq!(estimator.estimate_len(4000), 1000);
        assert_eq!(estimator.estimate_len(4001), 1001);
    }
}
