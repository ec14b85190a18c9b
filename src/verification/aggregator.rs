//! Verdict computation.
//!
//! The aggregator is a pure function of the three recorded sub-scores and the
//! configured thresholds, weights and risk bands. Per-check gates (liveness,
//! face match, OCR) dominate the blended score: a session whose overall score
//! clears the pass threshold still fails if any single check fell short.

use crate::configuration::types::{RiskBands, ScoreWeights, Thresholds};
use crate::verification::types::{CheckScores, FailureReason, RiskLevel, Verdict};

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    thresholds: Thresholds,
    weights: ScoreWeights,
    risk: RiskBands,
}

impl Aggregator {
    pub fn new(thresholds: Thresholds, weights: ScoreWeights, risk: RiskBands) -> Self {
        Self { thresholds, weights, risk }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn evaluate(&self, scores: &CheckScores) -> Verdict {
        let face_match_passed = normalize(scores.face_match_score) >= self.thresholds.face_match;
        let ocr_passed = clamp_percent(scores.ocr_confidence) >= self.thresholds.ocr_confidence;

        if !scores.is_live {
            return Verdict {
                overall_score: 0.0,
                is_live: false,
                ocr_passed,
                face_match_passed,
                verification_passed: false,
                risk_level: RiskLevel::High,
                failure_reason: Some(FailureReason::LivenessFailed),
            };
        }

        let overall_score = self.overall_score(scores);
        let risk_level = self.risk_level(overall_score);

        let failure_reason = if !face_match_passed {
            Some(FailureReason::FaceMatchBelowThreshold)
        } else if !ocr_passed {
            Some(FailureReason::OcrBelowThreshold)
        } else if overall_score < self.thresholds.verification_pass {
            Some(FailureReason::LowOverallScore)
        } else {
            None
        };

        Verdict {
            overall_score,
            is_live: true,
            ocr_passed,
            face_match_passed,
            verification_passed: failure_reason.is_none(),
            risk_level,
            failure_reason,
        }
    }

    /// Weighted mean of the normalized sub-scores, in 0-1.
    pub fn overall_score(&self, scores: &CheckScores) -> f64 {
        let w = &self.weights;
        let total = w.total();
        if total <= 0.0 {
            return 0.0;
        }
        let sum = w.ocr * normalize(scores.ocr_confidence)
            + w.liveness * normalize(scores.liveness_confidence)
            + w.face_match * normalize(scores.face_match_score);
        (sum / total).clamp(0.0, 1.0)
    }

    pub fn risk_level(&self, overall_score: f64) -> RiskLevel {
        let medium_min = self.risk.medium_min_or(self.thresholds.verification_pass);
        if overall_score >= self.risk.low_min {
            RiskLevel::Low
        } else if overall_score >= medium_min {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

fn normalize(percent: f64) -> f64 {
    clamp_percent(percent) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(ocr: f64, liveness: f64, is_live: bool, face: f64) -> CheckScores {
        CheckScores {
            ocr_confidence: ocr,
            liveness_confidence: liveness,
            is_live,
            face_match_score: face,
        }
    }

    #[test]
    fn test_strong_scores_pass_with_low_risk() {
        let verdict = Aggregator::default().evaluate(&scores(85.0, 90.0, true, 82.0));
        assert!(verdict.verification_passed);
        assert!(verdict.ocr_passed && verdict.face_match_passed);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert_eq!(verdict.failure_reason, None);
        assert!((verdict.overall_score - 2.57 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_not_live_fails_regardless_of_scores() {
        let aggregator = Aggregator::default();
        for (ocr, face) in [(100.0, 100.0), (0.0, 0.0), (85.0, 82.0)] {
            let verdict = aggregator.evaluate(&scores(ocr, 99.0, false, face));
            assert!(!verdict.verification_passed);
            assert_eq!(verdict.failure_reason, Some(FailureReason::LivenessFailed));
            assert_eq!(verdict.risk_level, RiskLevel::High);
        }
    }

    #[test]
    fn test_ocr_gate_dominates_blended_score() {
        let verdict = Aggregator::default().evaluate(&scores(40.0, 99.0, true, 99.0));
        assert!(verdict.overall_score >= 0.75);
        assert!(!verdict.ocr_passed);
        assert!(verdict.face_match_passed);
        assert!(!verdict.verification_passed);
        assert_eq!(verdict.failure_reason, Some(FailureReason::OcrBelowThreshold));
    }

    #[test]
    fn test_face_match_gate_uses_unit_threshold() {
        let aggregator = Aggregator::default();
        let at = aggregator.evaluate(&scores(95.0, 95.0, true, 60.0));
        assert!(at.face_match_passed);
        let below = aggregator.evaluate(&scores(95.0, 95.0, true, 59.9));
        assert!(!below.face_match_passed);
        assert_eq!(below.failure_reason, Some(FailureReason::FaceMatchBelowThreshold));
    }

    #[test]
    fn test_face_match_reason_takes_precedence_over_ocr() {
        let verdict = Aggregator::default().evaluate(&scores(10.0, 95.0, true, 10.0));
        assert_eq!(verdict.failure_reason, Some(FailureReason::FaceMatchBelowThreshold));
    }

    #[test]
    fn test_passing_gates_but_low_blend_reports_low_overall_score() {
        // 0.61 + 0.62 + 0.61 averages to ~0.613, below 0.75
        let verdict = Aggregator::default().evaluate(&scores(61.0, 62.0, true, 61.0));
        assert!(verdict.ocr_passed && verdict.face_match_passed);
        assert!(!verdict.verification_passed);
        assert_eq!(verdict.failure_reason, Some(FailureReason::LowOverallScore));
        assert_eq!(verdict.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_raising_face_match_never_lowers_score_or_risk() {
        let aggregator = Aggregator::default();
        let mut previous = aggregator.evaluate(&scores(70.0, 80.0, true, 0.0));
        for face in 1..=100 {
            let next = aggregator.evaluate(&scores(70.0, 80.0, true, face as f64));
            assert!(next.overall_score >= previous.overall_score);
            assert!(next.risk_level <= previous.risk_level);
            previous = next;
        }
    }

    #[test]
    fn test_weights_shift_the_blend() {
        let weighted = Aggregator::new(
            Thresholds::default(),
            ScoreWeights { ocr: 0.0, liveness: 0.0, face_match: 1.0 },
            RiskBands::default(),
        );
        let verdict = weighted.evaluate(&scores(60.0, 70.0, true, 90.0));
        assert!((verdict.overall_score - 0.9).abs() < 1e-9);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        let aggregator = Aggregator::default();
        let verdict = aggregator.evaluate(&scores(250.0, 250.0, true, 250.0));
        assert_eq!(verdict.overall_score, 1.0);
        let verdict = aggregator.evaluate(&scores(f64::NAN, -5.0, true, 90.0));
        assert!(!verdict.ocr_passed);
        assert!((verdict.overall_score - 0.3).abs() < 1e-9);
    }
}
