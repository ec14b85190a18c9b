use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::VerificationError;
use crate::session_management::{CheckKind, SessionStatus};
use crate::storage::types::FaceBox;
use crate::verification::types::FailureReason;

/// One verification attempt for one user.
///
/// The `*_id` pointers name the child rows the latest outcome of each check was
/// written to, so `finalize` reads exactly what was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSession {
    pub id: i64,
    pub user_id: i64,
    pub session_token: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ocr_completed: bool,
    pub liveness_completed: bool,
    pub face_match_completed: bool,
    pub verification_passed: bool,
    pub failure_reason: Option<FailureReason>,
    pub ocr_document_id: Option<i64>,
    pub liveness_image_id: Option<i64>,
    pub face_match_image_id: Option<i64>,
}

impl VerificationSession {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_check_completed(&self, kind: CheckKind) -> bool {
        match kind {
            CheckKind::Ocr => self.ocr_completed,
            CheckKind::Liveness => self.liveness_completed,
            CheckKind::FaceMatch => self.face_match_completed,
        }
    }

    pub fn all_checks_completed(&self) -> bool {
        CheckKind::ALL.iter().all(|k| self.is_check_completed(*k))
    }

    pub fn missing_checks(&self) -> Vec<CheckKind> {
        CheckKind::ALL
            .iter()
            .copied()
            .filter(|k| !self.is_check_completed(*k))
            .collect()
    }

    /// Marks `kind` as reported and remembers the child row holding its value.
    ///
    /// Moves `pending` to `in_progress`; refuses terminal sessions.
    pub fn mark_check_recorded(
        &mut self,
        kind: CheckKind,
        child_id: i64,
    ) -> Result<(), VerificationError> {
        if self.is_terminal() {
            return Err(VerificationError::SessionAlreadyTerminal);
        }
        match kind {
            CheckKind::Ocr => {
                self.ocr_completed = true;
                self.ocr_document_id = Some(child_id);
            }
            CheckKind::Liveness => {
                self.liveness_completed = true;
                self.liveness_image_id = Some(child_id);
            }
            CheckKind::FaceMatch => {
                self.face_match_completed = true;
                self.face_match_image_id = Some(child_id);
            }
        }
        if self.status == SessionStatus::Pending {
            self.status = SessionStatus::InProgress;
        }
        Ok(())
    }

    /// Moves the session to its terminal state.
    pub fn conclude(
        &mut self,
        passed: bool,
        failure_reason: Option<FailureReason>,
        at: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        if self.is_terminal() {
            return Err(VerificationError::SessionAlreadyTerminal);
        }
        if !self.all_checks_completed() {
            return Err(VerificationError::IncompleteChecks { missing: self.missing_checks() });
        }
        if passed {
            self.status = SessionStatus::Completed;
            self.failure_reason = None;
        } else {
            self.status = SessionStatus::Failed;
            self.failure_reason = Some(failure_reason.unwrap_or(FailureReason::LowOverallScore));
        }
        self.verification_passed = passed;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Checks the structural invariants of the record.
    ///
    /// An `in_progress` session may have every flag set while it waits for
    /// `finalize`; a terminal one must have all of them.
    pub fn check_invariants(&self) -> Result<(), VerificationError> {
        let terminal = self.is_terminal();
        if terminal && !self.all_checks_completed() {
            return Err(VerificationError::DataIntegrity(format!(
                "session {} is {} with checks missing: {:?}",
                self.id,
                self.status.as_str(),
                self.missing_checks()
            )));
        }
        if terminal != self.completed_at.is_some() {
            return Err(VerificationError::DataIntegrity(format!(
                "session {} is {} but completed_at is {:?}",
                self.id,
                self.status.as_str(),
                self.completed_at
            )));
        }
        if self.status == SessionStatus::Failed && self.failure_reason.is_none() {
            return Err(VerificationError::DataIntegrity(format!(
                "session {} failed without a failure reason",
                self.id
            )));
        }
        if self.status == SessionStatus::Pending
            && (self.ocr_completed || self.liveness_completed || self.face_match_completed)
        {
            return Err(VerificationError::DataIntegrity(format!(
                "session {} is pending with checks recorded",
                self.id
            )));
        }
        Ok(())
    }
}

/// Result of the OCR check on one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutcome {
    pub document_id: i64,
    /// 0-100
    pub confidence: f64,
    pub document_type: Option<String>,
    pub is_valid_document: bool,
    pub extracted_data_encrypted: Option<Vec<u8>>,
}

/// Result of liveness detection on one live capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessOutcome {
    pub live_image_id: i64,
    pub is_live: bool,
    /// 0-100
    pub confidence: f64,
    pub faces_detected: u32,
    pub face_coordinates: Vec<FaceBox>,
    pub details: Option<serde_json::Value>,
}

/// Result of comparing a live capture against the ID document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatchOutcome {
    pub live_image_id: i64,
    pub document_id: i64,
    /// 0-100
    pub score: f64,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckOutcome {
    Ocr(OcrOutcome),
    Liveness(LivenessOutcome),
    FaceMatch(FaceMatchOutcome),
}

impl CheckOutcome {
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckOutcome::Ocr(_) => CheckKind::Ocr,
            CheckOutcome::Liveness(_) => CheckKind::Liveness,
            CheckOutcome::FaceMatch(_) => CheckKind::FaceMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> VerificationSession {
        VerificationSession {
            id: 1,
            user_id: 1,
            session_token: "t".into(),
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            ocr_completed: false,
            liveness_completed: false,
            face_match_completed: false,
            verification_passed: false,
            failure_reason: None,
            ocr_document_id: None,
            liveness_image_id: None,
            face_match_image_id: None,
        }
    }

    #[test]
    fn test_first_recorded_check_starts_progress() {
        let mut session = pending();
        session.mark_check_recorded(CheckKind::Liveness, 7).unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.liveness_image_id, Some(7));
        assert_eq!(session.missing_checks(), vec![CheckKind::Ocr, CheckKind::FaceMatch]);
        session.check_invariants().unwrap();
    }

    #[test]
    fn test_conclude_requires_every_check() {
        let mut session = pending();
        session.mark_check_recorded(CheckKind::Ocr, 1).unwrap();
        session.mark_check_recorded(CheckKind::Liveness, 2).unwrap();
        let err = session.conclude(true, None, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::IncompleteChecks { ref missing } if missing == &vec![CheckKind::FaceMatch]
        ));
        assert_eq!(session.status, SessionStatus::InProgress);
    }

    #[test]
    fn test_terminal_session_refuses_changes() {
        let mut session = pending();
        for kind in CheckKind::ALL {
            session.mark_check_recorded(kind, 1).unwrap();
        }
        session
            .conclude(false, Some(FailureReason::OcrBelowThreshold), Utc::now())
            .unwrap();
        session.check_invariants().unwrap();
        let before = session.clone();
        assert!(matches!(
            session.mark_check_recorded(CheckKind::Ocr, 9),
            Err(VerificationError::SessionAlreadyTerminal)
        ));
        assert!(matches!(
            session.conclude(true, None, Utc::now()),
            Err(VerificationError::SessionAlreadyTerminal)
        ));
        assert_eq!(session, before);
    }

    #[test]
    fn test_invariants_catch_terminal_without_checks() {
        let mut session = pending();
        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());
        assert!(matches!(
            session.check_invariants(),
            Err(VerificationError::DataIntegrity(_))
        ));
    }
}
