use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::json;
use uuid::Uuid;

use crate::configuration::config::Config;
use crate::configuration::types::UserVerificationPolicy;
use crate::error_handling::types::{StorageError, VerificationError};
use crate::session_management::session::{CheckOutcome, VerificationSession};
use crate::session_management::CheckKind;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    Document, DocumentUpload, Finalization, LiveImage, LiveImageUpload, NewSession, NewUser,
    NewVerificationResult, SessionFilter, User, VerificationResult,
};
use crate::verification::aggregator::Aggregator;
use crate::verification::types::{CheckScores, FailureReason, Verdict};

/// The structure driving verification sessions through their lifecycle
///
/// Every state transition goes through this manager. It serializes work on a
/// single session with an in-process lock and relies on the store's guarded
/// updates so that a terminal session is never modified, even by another
/// process sharing the same database.
///
/// # Fields Overview
///
/// - `storage`: record store holding users, sessions and their children
/// - `aggregator`: verdict computation with the configured thresholds
/// - `policy`: whether a passing session marks its user verified
/// - `locks`: one mutex per session currently being worked on
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    aggregator: Aggregator,
    policy: UserVerificationPolicy,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

/// Child rows a finalize reads its scores from.
struct Evidence {
    scores: CheckScores,
    document: Document,
    liveness_image: LiveImage,
    face_image: LiveImage,
}

fn not_found(err: StorageError, what: impl FnOnce() -> String) -> VerificationError {
    match err {
        StorageError::NotFound => VerificationError::NotFound(what()),
        other => VerificationError::Storage(other),
    }
}

fn terminal_on_conflict(err: StorageError) -> VerificationError {
    match err {
        StorageError::Conflict => VerificationError::SessionAlreadyTerminal,
        other => VerificationError::Storage(other),
    }
}

fn check_percent(kind: CheckKind, name: &str, value: f64) -> Result<(), VerificationError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(VerificationError::MalformedReport {
            kind,
            reason: format!("{} must be within 0..=100, got {}", name, value),
        });
    }
    Ok(())
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        aggregator: Aggregator,
        policy: UserVerificationPolicy,
    ) -> Self {
        Self { storage, aggregator, policy, locks: Mutex::new(HashMap::new()) }
    }

    pub fn from_config(storage: Arc<dyn Storage>, config: &Config) -> Self {
        let aggregator = Aggregator::new(
            config.thresholds.clone(),
            config.weights.clone(),
            config.risk.clone(),
        );
        Self::new(storage, aggregator, config.policy.user_verification)
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Runs `f` while holding the session's mutex.
    ///
    /// The map entry is dropped again once no other caller holds or waits on
    /// it, whatever `f` returned.
    fn with_session_lock<T>(
        &self,
        session_id: i64,
        f: impl FnOnce() -> Result<T, VerificationError>,
    ) -> Result<T, VerificationError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(session_id).or_default().clone()
        };
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // only the map and this call still reference it
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&session_id);
        }
        outcome
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn load_session(&self, session_id: i64) -> Result<VerificationSession, VerificationError> {
        self.storage
            .get_session(session_id)
            .map_err(|e| not_found(e, || format!("session {}", session_id)))
    }

    fn load_open_session(&self, session_id: i64) -> Result<VerificationSession, VerificationError> {
        let session = self.load_session(session_id)?;
        if session.is_terminal() {
            debug!("[{}] Refusing change to {} session", session.session_token, session.status.as_str());
            return Err(VerificationError::SessionAlreadyTerminal);
        }
        Ok(session)
    }

    fn owned_document(
        &self,
        session: &VerificationSession,
        document_id: i64,
    ) -> Result<Document, VerificationError> {
        let document = self
            .storage
            .get_document(document_id)
            .map_err(|e| not_found(e, || format!("document {}", document_id)))?;
        if document.session_id != session.id {
            return Err(VerificationError::ArtifactMismatch(format!(
                "document {} belongs to session {}, not {}",
                document_id, document.session_id, session.id
            )));
        }
        Ok(document)
    }

    fn owned_live_image(
        &self,
        session: &VerificationSession,
        image_id: i64,
    ) -> Result<LiveImage, VerificationError> {
        let image = self
            .storage
            .get_live_image(image_id)
            .map_err(|e| not_found(e, || format!("live image {}", image_id)))?;
        if image.session_id != session.id {
            return Err(VerificationError::ArtifactMismatch(format!(
                "live image {} belongs to session {}, not {}",
                image_id, image.session_id, session.id
            )));
        }
        Ok(image)
    }

    pub fn create_user(
        &self,
        email: &str,
        full_name: &str,
        phone: Option<&str>,
    ) -> Result<User, VerificationError> {
        let user = self.storage.insert_user(&NewUser {
            email: email.to_string(),
            full_name: full_name.to_string(),
            phone: phone.map(str::to_string),
        })?;
        info!("Created user {} <{}>", user.id, user.email);
        Ok(user)
    }

    /// Opens a `pending` session with a fresh random token.
    pub fn create_session(&self, user_id: i64) -> Result<VerificationSession, VerificationError> {
        self.create_session_with_token(user_id, &Uuid::new_v4().to_string())
    }

    pub fn create_session_with_token(
        &self,
        user_id: i64,
        session_token: &str,
    ) -> Result<VerificationSession, VerificationError> {
        let session = self
            .storage
            .insert_session(&NewSession {
                user_id,
                session_token: session_token.to_string(),
                created_at: Utc::now(),
            })
            .map_err(|e| match e {
                StorageError::Conflict => VerificationError::DuplicateToken,
                other => not_found(other, || format!("user {}", user_id)),
            })?;
        session.check_invariants()?;
        info!("[{}] Session {} created for user {}", session.session_token, session.id, user_id);
        Ok(session)
    }

    pub fn attach_document(
        &self,
        session_id: i64,
        upload: &DocumentUpload,
    ) -> Result<Document, VerificationError> {
        self.with_session_lock(session_id, || {
            let session = self.load_open_session(session_id)?;
            let document = self.storage.insert_document(session.id, upload)?;
            debug!("[{}] Document {} attached ({})", session.session_token, document.id, document.file_name);
            Ok(document)
        })
    }

    pub fn attach_live_image(
        &self,
        session_id: i64,
        upload: &LiveImageUpload,
    ) -> Result<LiveImage, VerificationError> {
        self.with_session_lock(session_id, || {
            let session = self.load_open_session(session_id)?;
            let image = self.storage.insert_live_image(session.id, upload)?;
            debug!("[{}] Live image {} attached", session.session_token, image.id);
            Ok(image)
        })
    }

    /// Writes one check outcome onto its child row and marks the check done.
    ///
    /// Recording the same kind again overwrites the earlier outcome.
    pub fn record_check_result(
        &self,
        session_id: i64,
        outcome: &CheckOutcome,
    ) -> Result<VerificationSession, VerificationError> {
        self.with_session_lock(session_id, || self.record_locked(session_id, outcome))
    }

    fn record_locked(
        &self,
        session_id: i64,
        outcome: &CheckOutcome,
    ) -> Result<VerificationSession, VerificationError> {
        let mut session = self.load_open_session(session_id)?;
        let kind = outcome.kind();

        let child_id = match outcome {
            CheckOutcome::Ocr(ocr) => {
                check_percent(kind, "confidence", ocr.confidence)?;
                let mut document = self.owned_document(&session, ocr.document_id)?;
                document.ocr_confidence = Some(ocr.confidence);
                document.document_type = ocr.document_type.clone();
                document.is_valid_document = ocr.is_valid_document;
                document.extracted_data_encrypted = ocr.extracted_data_encrypted.clone();
                self.storage.update_document(&document)?;
                document.id
            }
            CheckOutcome::Liveness(liveness) => {
                check_percent(kind, "confidence", liveness.confidence)?;
                let mut image = self.owned_live_image(&session, liveness.live_image_id)?;
                image.is_live = liveness.is_live;
                image.liveness_confidence = Some(liveness.confidence);
                image.faces_detected = liveness.faces_detected;
                image.face_coordinates = liveness.face_coordinates.clone();
                image.liveness_details = liveness.details.clone();
                self.storage.update_live_image(&image)?;
                image.id
            }
            CheckOutcome::FaceMatch(face) => {
                check_percent(kind, "score", face.score)?;
                self.owned_document(&session, face.document_id)?;
                let mut image = self.owned_live_image(&session, face.live_image_id)?;
                image.face_match_score = Some(face.score);
                image.face_match_details = face.details.clone();
                self.storage.update_live_image(&image)?;
                image.id
            }
        };

        session.mark_check_recorded(kind, child_id)?;
        session.check_invariants()?;
        self.storage.update_open_session(&session).map_err(terminal_on_conflict)?;
        info!(
            "[{}] Recorded {} check (row {}), status {}",
            session.session_token,
            kind.as_str(),
            child_id,
            session.status.as_str()
        );
        Ok(session)
    }

    fn load_evidence(&self, session: &VerificationSession) -> Result<Evidence, VerificationError> {
        let integrity = |msg: String| VerificationError::DataIntegrity(msg);
        let child = |err: StorageError, what: String| match err {
            StorageError::NotFound => integrity(format!("{} is missing", what)),
            other => VerificationError::Storage(other),
        };

        let document_id = session
            .ocr_document_id
            .ok_or_else(|| integrity("ocr recorded without a document".into()))?;
        let liveness_id = session
            .liveness_image_id
            .ok_or_else(|| integrity("liveness recorded without a live image".into()))?;
        let face_id = session
            .face_match_image_id
            .ok_or_else(|| integrity("face match recorded without a live image".into()))?;

        let document = self
            .storage
            .get_document(document_id)
            .map_err(|e| child(e, format!("document {}", document_id)))?;
        let liveness_image = self
            .storage
            .get_live_image(liveness_id)
            .map_err(|e| child(e, format!("live image {}", liveness_id)))?;
        let face_image = self
            .storage
            .get_live_image(face_id)
            .map_err(|e| child(e, format!("live image {}", face_id)))?;

        if document.session_id != session.id
            || liveness_image.session_id != session.id
            || face_image.session_id != session.id
        {
            return Err(integrity("recorded rows belong to another session".into()));
        }

        let ocr_confidence = document
            .ocr_confidence
            .ok_or_else(|| integrity(format!("document {} has no OCR confidence", document.id)))?;
        let liveness_confidence = liveness_image.liveness_confidence.ok_or_else(|| {
            integrity(format!("live image {} has no liveness confidence", liveness_image.id))
        })?;
        let face_match_score = face_image.face_match_score.ok_or_else(|| {
            integrity(format!("live image {} has no face-match score", face_image.id))
        })?;
        for (name, value) in [
            ("ocr confidence", ocr_confidence),
            ("liveness confidence", liveness_confidence),
            ("face-match score", face_match_score),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(integrity(format!("stored {} out of range: {}", name, value)));
            }
        }

        Ok(Evidence {
            scores: CheckScores {
                ocr_confidence,
                liveness_confidence,
                is_live: liveness_image.is_live,
                face_match_score,
            },
            document,
            liveness_image,
            face_image,
        })
    }

    fn result_details(&self, evidence: &Evidence, verdict: &Verdict) -> serde_json::Value {
        let thresholds = self.aggregator.thresholds();
        let weights = self.aggregator.weights();
        json!({
            "overall_score": verdict.overall_score,
            "risk_level": verdict.risk_level.as_str(),
            "failure_reason": verdict.failure_reason.map(|r| r.as_str()),
            "ocr": {
                "document_id": evidence.document.id,
                "confidence": evidence.scores.ocr_confidence,
                "threshold": thresholds.ocr_confidence,
                "passed": verdict.ocr_passed,
                "document_type": evidence.document.document_type,
                "is_valid_document": evidence.document.is_valid_document,
            },
            "liveness": {
                "live_image_id": evidence.liveness_image.id,
                "confidence": evidence.scores.liveness_confidence,
                "is_live": verdict.is_live,
                "faces_detected": evidence.liveness_image.faces_detected,
            },
            "face_match": {
                "live_image_id": evidence.face_image.id,
                "score": evidence.scores.face_match_score,
                "threshold": thresholds.face_match * 100.0,
                "passed": verdict.face_match_passed,
            },
            "weights": {
                "ocr": weights.ocr,
                "liveness": weights.liveness,
                "face_match": weights.face_match,
            },
            "pass_threshold": thresholds.verification_pass,
        })
    }

    /// Computes the verdict and moves the session to `completed` or `failed`.
    ///
    /// Succeeds at most once per session; later calls get
    /// `SessionAlreadyTerminal` and write nothing.
    pub fn finalize(&self, session_id: i64) -> Result<VerificationResult, VerificationError> {
        self.with_session_lock(session_id, || self.finalize_locked(session_id))
    }

    fn finalize_locked(&self, session_id: i64) -> Result<VerificationResult, VerificationError> {
        let mut session = self.load_open_session(session_id)?;
        if !session.all_checks_completed() {
            return Err(VerificationError::IncompleteChecks { missing: session.missing_checks() });
        }

        let evidence = match self.load_evidence(&session) {
            Ok(evidence) => evidence,
            Err(VerificationError::DataIntegrity(msg)) => {
                error!("[{}] Integrity failure, failing session: {}", session.session_token, msg);
                session.conclude(false, Some(FailureReason::IntegrityError), Utc::now())?;
                session.check_invariants()?;
                self.storage
                    .commit_finalization(&Finalization {
                        session: session.clone(),
                        result: None,
                        mark_user_verified: false,
                    })
                    .map_err(terminal_on_conflict)?;
                return Err(VerificationError::DataIntegrity(msg));
            }
            Err(other) => return Err(other),
        };

        let verdict = self.aggregator.evaluate(&evidence.scores);
        let now = Utc::now();
        session.conclude(verdict.verification_passed, verdict.failure_reason, now)?;
        session.check_invariants()?;

        let result = NewVerificationResult {
            session_id: session.id,
            created_at: now,
            face_match_score: evidence.scores.face_match_score,
            face_match_threshold: self.aggregator.thresholds().face_match * 100.0,
            face_match_passed: verdict.face_match_passed,
            overall_score: verdict.overall_score,
            risk_level: verdict.risk_level,
            verification_passed: verdict.verification_passed,
            verification_details: self.result_details(&evidence, &verdict),
            processing_time_ms: (now - session.created_at).num_milliseconds().max(0),
            authoritative: true,
        };
        let mark_user_verified = verdict.verification_passed
            && self.policy == UserVerificationPolicy::MarkOnPass;

        let written = self
            .storage
            .commit_finalization(&Finalization {
                session: session.clone(),
                result: Some(result),
                mark_user_verified,
            })
            .map_err(terminal_on_conflict)?
            .ok_or_else(|| {
                VerificationError::DataIntegrity(format!(
                    "store returned no result row for session {}",
                    session.id
                ))
            })?;

        match verdict.failure_reason {
            None => info!(
                "[{}] Verification passed (score {:.3}, risk {})",
                session.session_token,
                verdict.overall_score,
                verdict.risk_level.as_str()
            ),
            Some(reason) => warn!(
                "[{}] Verification failed: {} (score {:.3}, risk {})",
                session.session_token,
                reason.as_str(),
                verdict.overall_score,
                verdict.risk_level.as_str()
            ),
        }
        Ok(written)
    }

    pub fn get_session(&self, session_id: i64) -> Result<VerificationSession, VerificationError> {
        self.load_session(session_id)
    }

    pub fn get_session_by_token(
        &self,
        token: &str,
    ) -> Result<VerificationSession, VerificationError> {
        self.storage
            .get_session_by_token(token)
            .map_err(|e| not_found(e, || format!("session with token {}", token)))
    }

    pub fn list_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<VerificationSession>, VerificationError> {
        Ok(self.storage.get_sessions(filter)?)
    }

    /// The result row that decided the session, if it has been finalized.
    pub fn authoritative_result(
        &self,
        session_id: i64,
    ) -> Result<Option<VerificationResult>, VerificationError> {
        let results = self.list_results(session_id)?;
        Ok(results.into_iter().rev().find(|r| r.authoritative))
    }

    pub fn list_results(&self, session_id: i64) -> Result<Vec<VerificationResult>, VerificationError> {
        self.load_session(session_id)?;
        Ok(self.storage.list_results(session_id)?)
    }

    pub fn get_user(&self, user_id: i64) -> Result<User, VerificationError> {
        self.storage
            .get_user(user_id)
            .map_err(|e| not_found(e, || format!("user {}", user_id)))
    }

    pub fn get_document(&self, document_id: i64) -> Result<Document, VerificationError> {
        self.storage
            .get_document(document_id)
            .map_err(|e| not_found(e, || format!("document {}", document_id)))
    }

    pub fn get_live_image(&self, image_id: i64) -> Result<LiveImage, VerificationError> {
        self.storage
            .get_live_image(image_id)
            .map_err(|e| not_found(e, || format!("live image {}", image_id)))
    }

    pub fn list_documents(&self, session_id: i64) -> Result<Vec<Document>, VerificationError> {
        Ok(self.storage.list_documents(session_id)?)
    }

    pub fn list_live_images(&self, session_id: i64) -> Result<Vec<LiveImage>, VerificationError> {
        Ok(self.storage.list_live_images(session_id)?)
    }

    /// Removes terminal sessions completed before `older_than`, with their children.
    pub fn purge_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, VerificationError> {
        let removed = self.storage.cleanup_old_sessions(older_than)?;
        info!("Purged {} session(s) completed before {}", removed, older_than.to_rfc3339());
        Ok(removed)
    }
}
