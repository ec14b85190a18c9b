//! Common data types used across the verification subsystem.

use serde::{Deserialize, Serialize};

/// Categorical risk attached to a verdict. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// Fixed vocabulary explaining why a session ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    LivenessFailed,
    FaceMatchBelowThreshold,
    OcrBelowThreshold,
    IntegrityError,
    LowOverallScore,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::LivenessFailed => "liveness_failed",
            FailureReason::FaceMatchBelowThreshold => "face_match_below_threshold",
            FailureReason::OcrBelowThreshold => "ocr_below_threshold",
            FailureReason::IntegrityError => "integrity_error",
            FailureReason::LowOverallScore => "low_overall_score",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "liveness_failed" => Some(FailureReason::LivenessFailed),
            "face_match_below_threshold" => Some(FailureReason::FaceMatchBelowThreshold),
            "ocr_below_threshold" => Some(FailureReason::OcrBelowThreshold),
            "integrity_error" => Some(FailureReason::IntegrityError),
            "low_overall_score" => Some(FailureReason::LowOverallScore),
            _ => None,
        }
    }
}

/// The three recorded sub-scores a verdict is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckScores {
    /// 0-100
    pub ocr_confidence: f64,
    /// 0-100
    pub liveness_confidence: f64,
    pub is_live: bool,
    /// 0-100
    pub face_match_score: f64,
}

/// Output of the aggregator for one set of scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// 0-1
    pub overall_score: f64,
    pub is_live: bool,
    pub ocr_passed: bool,
    pub face_match_passed: bool,
    pub verification_passed: bool,
    pub risk_level: RiskLevel,
    /// `None` exactly when `verification_passed` is true.
    pub failure_reason: Option<FailureReason>,
}
