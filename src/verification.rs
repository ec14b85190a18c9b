//! Result aggregation: turns recorded check scores into a verdict.

pub mod aggregator;
pub mod types;

pub use aggregator::Aggregator;
pub use types::{CheckScores, FailureReason, RiskLevel, Verdict};
