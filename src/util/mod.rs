//! Utility modules: token estimation, retry, timeout.

pub mod retry;
pub mod timeout;
pub mod tokens;

pub use tokens::{HeuristicEstimator, TokenEstimator};
