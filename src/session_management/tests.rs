use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};

use crate::configuration::types::UserVerificationPolicy;
use crate::error_handling::types::VerificationError;
use crate::session_management::session::{
    CheckOutcome, FaceMatchOutcome, LivenessOutcome, OcrOutcome, VerificationSession,
};
use crate::session_management::session_manager::SessionManager;
use crate::session_management::{CheckKind, SessionStatus};
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::session_filter;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{Document, DocumentUpload, FaceBox, LiveImage, LiveImageUpload, User};
use crate::verification::aggregator::Aggregator;
use crate::verification::types::{FailureReason, RiskLevel};

fn manager_with(policy: UserVerificationPolicy) -> (Arc<MemoryStorage>, SessionManager) {
    let storage = Arc::new(MemoryStorage::new());
    let manager = SessionManager::new(storage.clone(), Aggregator::default(), policy);
    (storage, manager)
}

fn manager() -> (Arc<MemoryStorage>, SessionManager) {
    manager_with(UserVerificationPolicy::MarkOnPass)
}

fn doc_upload(name: &str) -> DocumentUpload {
    DocumentUpload {
        file_path: format!("uploads/id_documents/{}", name),
        file_name: name.to_string(),
        file_type: "png".into(),
        file_size: 2048,
    }
}

fn image_upload(name: &str) -> LiveImageUpload {
    LiveImageUpload { file_path: format!("uploads/live_images/{}", name) }
}

// A user with one open session that has a document and a live image attached
fn open_session(manager: &SessionManager, email: &str) -> (User, VerificationSession, Document, LiveImage) {
    let user = manager.create_user(email, "Ada Lovelace", None).unwrap();
    let session = manager.create_session(user.id).unwrap();
    let document = manager.attach_document(session.id, &doc_upload("passport.png")).unwrap();
    let image = manager.attach_live_image(session.id, &image_upload("selfie.jpg")).unwrap();
    (user, session, document, image)
}

fn ocr(document_id: i64, confidence: f64) -> CheckOutcome {
    CheckOutcome::Ocr(OcrOutcome {
        document_id,
        confidence,
        document_type: Some("passport".into()),
        is_valid_document: true,
        extracted_data_encrypted: Some(vec![0xde, 0xad]),
    })
}

fn liveness(live_image_id: i64, is_live: bool, confidence: f64) -> CheckOutcome {
    CheckOutcome::Liveness(LivenessOutcome {
        live_image_id,
        is_live,
        confidence,
        faces_detected: 1,
        face_coordinates: vec![FaceBox { x: 10, y: 20, width: 100, height: 120 }],
        details: None,
    })
}

fn face(live_image_id: i64, document_id: i64, score: f64) -> CheckOutcome {
    CheckOutcome::FaceMatch(FaceMatchOutcome { live_image_id, document_id, score, details: None })
}

fn record_all(
    manager: &SessionManager,
    session: &VerificationSession,
    document: &Document,
    image: &LiveImage,
    scores: (f64, bool, f64, f64),
) {
    let (ocr_confidence, is_live, live_confidence, face_score) = scores;
    manager.record_check_result(session.id, &ocr(document.id, ocr_confidence)).unwrap();
    manager
        .record_check_result(session.id, &liveness(image.id, is_live, live_confidence))
        .unwrap();
    manager
        .record_check_result(session.id, &face(image.id, document.id, face_score))
        .unwrap();
}

#[test]
fn test_passing_session_round_trip() {
    let (_, manager) = manager();
    let (user, session, document, image) = open_session(&manager, "pass@example.com");
    assert_eq!(session.status, SessionStatus::Pending);

    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));
    let before = manager.get_session(session.id).unwrap();
    assert_eq!(before.status, SessionStatus::InProgress);
    assert!(before.all_checks_completed());

    let result = manager.finalize(session.id).unwrap();
    assert!(result.verification_passed);
    assert!(result.authoritative);
    assert_eq!(result.risk_level, RiskLevel::Low);
    assert!((result.overall_score - 0.8567).abs() < 1e-3);
    assert_eq!(result.face_match_score, 82.0);
    assert!((result.face_match_threshold - 60.0).abs() < 1e-9);
    assert!(result.face_match_passed);
    assert!(result.processing_time_ms >= 0);
    assert_eq!(result.verification_details["ocr"]["confidence"], 85.0);

    let after = manager.get_session(session.id).unwrap();
    assert_eq!(after.status, SessionStatus::Completed);
    assert!(after.verification_passed);
    assert_eq!(after.failure_reason, None);
    assert!(after.completed_at.is_some());
    after.check_invariants().unwrap();

    assert!(manager.get_user(user.id).unwrap().is_verified);
    assert_eq!(manager.authoritative_result(session.id).unwrap(), Some(result));
    assert_eq!(manager.get_session_by_token(&session.session_token).unwrap().id, session.id);

    let stored = manager.get_document(document.id).unwrap();
    assert_eq!(stored.ocr_confidence, Some(85.0));
    assert_eq!(stored.extracted_data_encrypted, Some(vec![0xde, 0xad]));
    let stored = manager.get_live_image(image.id).unwrap();
    assert!(stored.is_live);
    assert_eq!(stored.face_match_score, Some(82.0));
}

#[test]
fn test_low_ocr_fails_even_with_strong_face_match() {
    let (_, manager) = manager();
    let (user, session, document, image) = open_session(&manager, "ocr@example.com");
    record_all(&manager, &session, &document, &image, (40.0, true, 99.0, 95.0));

    let result = manager.finalize(session.id).unwrap();
    assert!(!result.verification_passed);

    let after = manager.get_session(session.id).unwrap();
    assert_eq!(after.status, SessionStatus::Failed);
    assert_eq!(after.failure_reason, Some(FailureReason::OcrBelowThreshold));
    assert!(!manager.get_user(user.id).unwrap().is_verified);
}

#[test]
fn test_not_live_fails_with_zero_score() {
    let (_, manager) = manager();
    let (_, session, document, image) = open_session(&manager, "spoof@example.com");
    record_all(&manager, &session, &document, &image, (99.0, false, 95.0, 99.0));

    let result = manager.finalize(session.id).unwrap();
    assert!(!result.verification_passed);
    assert_eq!(result.overall_score, 0.0);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert_eq!(
        manager.get_session(session.id).unwrap().failure_reason,
        Some(FailureReason::LivenessFailed)
    );
}

#[test]
fn test_finalize_with_missing_check_changes_nothing() {
    let (_, manager) = manager();
    let (_, session, document, image) = open_session(&manager, "early@example.com");
    manager.record_check_result(session.id, &ocr(document.id, 80.0)).unwrap();
    manager
        .record_check_result(session.id, &liveness(image.id, true, 90.0))
        .unwrap();

    let before = manager.get_session(session.id).unwrap();
    match manager.finalize(session.id) {
        Err(VerificationError::IncompleteChecks { missing }) => {
            assert_eq!(missing, vec![CheckKind::FaceMatch]);
        }
        other => panic!("expected IncompleteChecks, got {:?}", other),
    }
    assert_eq!(manager.get_session(session.id).unwrap(), before);
    assert!(manager.list_results(session.id).unwrap().is_empty());
}

#[test]
fn test_terminal_session_is_immutable() {
    let (_, manager) = manager();
    let (_, session, document, image) = open_session(&manager, "done@example.com");
    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));
    manager.finalize(session.id).unwrap();
    let done = manager.get_session(session.id).unwrap();

    assert!(matches!(
        manager.record_check_result(session.id, &ocr(document.id, 10.0)),
        Err(VerificationError::SessionAlreadyTerminal)
    ));
    assert!(matches!(
        manager.attach_document(session.id, &doc_upload("late.png")),
        Err(VerificationError::SessionAlreadyTerminal)
    ));
    assert!(matches!(
        manager.finalize(session.id),
        Err(VerificationError::SessionAlreadyTerminal)
    ));

    assert_eq!(manager.get_session(session.id).unwrap(), done);
    assert_eq!(manager.get_document(document.id).unwrap().ocr_confidence, Some(85.0));
    assert_eq!(manager.list_results(session.id).unwrap().len(), 1);
}

#[test]
fn test_concurrent_finalize_has_single_winner() {
    let (storage, manager) = manager();
    let (_, session, document, image) = open_session(&manager, "race@example.com");
    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));

    // two managers over one store behave like two processes sharing a database
    let other = Arc::new(SessionManager::new(
        storage.clone(),
        Aggregator::default(),
        UserVerificationPolicy::MarkOnPass,
    ));
    let manager = Arc::new(manager);
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let m = if i % 2 == 0 { manager.clone() } else { other.clone() };
            let barrier = barrier.clone();
            let id = session.id;
            thread::spawn(move || {
                barrier.wait();
                m.finalize(id)
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for outcome in outcomes.iter().filter(|r| r.is_err()) {
        assert!(matches!(outcome, Err(VerificationError::SessionAlreadyTerminal)));
    }

    let results = storage.list_results(session.id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.iter().filter(|r| r.authoritative).count(), 1);
    assert_eq!(manager.tracked_locks(), 0);
    assert_eq!(other.tracked_locks(), 0);
}

#[test]
fn test_concurrent_records_of_different_kinds() {
    let (_, manager) = manager();
    let (_, session, document, image) = open_session(&manager, "parallel@example.com");
    let manager = Arc::new(manager);
    let outcomes = vec![
        ocr(document.id, 70.0),
        liveness(image.id, true, 80.0),
        face(image.id, document.id, 75.0),
    ];
    let handles: Vec<_> = outcomes
        .into_iter()
        .map(|outcome| {
            let m = manager.clone();
            let id = session.id;
            thread::spawn(move || m.record_check_result(id, &outcome))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    let after = manager.get_session(session.id).unwrap();
    assert!(after.all_checks_completed());
    assert_eq!(after.status, SessionStatus::InProgress);
    assert_eq!(after.ocr_document_id, Some(document.id));
    assert_eq!(after.liveness_image_id, Some(image.id));
    assert_eq!(after.face_match_image_id, Some(image.id));
}

#[test]
fn test_concurrent_records_of_same_kind_are_not_merged() {
    let (_, manager) = manager();
    let (_, session, document, _) = open_session(&manager, "same-kind@example.com");
    let manager = Arc::new(manager);
    let barrier = Arc::new(Barrier::new(2));
    let document_id = document.id;

    let scans = vec![
        (41.0, "passport", vec![0x01]),
        (93.0, "driving_licence", vec![0x02, 0x03]),
    ];
    let handles: Vec<_> = scans
        .clone()
        .into_iter()
        .map(|(confidence, document_type, data)| {
            let m = manager.clone();
            let barrier = barrier.clone();
            let id = session.id;
            thread::spawn(move || {
                let outcome = CheckOutcome::Ocr(OcrOutcome {
                    document_id,
                    confidence,
                    document_type: Some(document_type.to_string()),
                    is_valid_document: true,
                    extracted_data_encrypted: Some(data),
                });
                barrier.wait();
                m.record_check_result(id, &outcome)
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    let after = manager.get_session(session.id).unwrap();
    assert!(after.ocr_completed);
    assert_eq!(after.ocr_document_id, Some(document.id));
    // the row carries one outcome whole, never fields from both
    let stored = manager.get_document(document.id).unwrap();
    let (_, document_type, data) = scans
        .iter()
        .find(|(confidence, ..)| stored.ocr_confidence == Some(*confidence))
        .unwrap()
        .clone();
    assert_eq!(stored.document_type.as_deref(), Some(document_type));
    assert_eq!(stored.extracted_data_encrypted, Some(data));
    assert_eq!(manager.tracked_locks(), 0);
}

#[test]
fn test_lock_map_drains_after_abandoned_sessions() {
    let (_, manager) = manager();
    for i in 0..200 {
        let user = manager.create_user(&format!("gone{}@example.com", i), "Gone", None).unwrap();
        let session = manager.create_session(user.id).unwrap();
        let document = manager.attach_document(session.id, &doc_upload("id.png")).unwrap();
        manager.record_check_result(session.id, &ocr(document.id, 70.0)).unwrap();
        assert!(matches!(
            manager.finalize(session.id),
            Err(VerificationError::IncompleteChecks { .. })
        ));
        assert!(manager.record_check_result(session.id, &ocr(9999, 70.0)).is_err());
    }
    assert_eq!(manager.tracked_locks(), 0);

    let (_, session, document, image) = open_session(&manager, "kept@example.com");
    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));
    manager.finalize(session.id).unwrap();
    assert!(manager.finalize(session.id).is_err());
    assert_eq!(manager.tracked_locks(), 0);
}

#[test]
fn test_duplicate_token_is_rejected() {
    let (_, manager) = manager();
    let user = manager.create_user("dup@example.com", "Dup", Some("+15550101")).unwrap();
    manager.create_session_with_token(user.id, "fixed-token").unwrap();
    let err = manager.create_session_with_token(user.id, "fixed-token").unwrap_err();
    assert!(matches!(err, VerificationError::DuplicateToken));
    assert!(err.is_retryable());

    assert!(matches!(
        manager.create_session(4242),
        Err(VerificationError::NotFound(_))
    ));
}

#[test]
fn test_integrity_failure_marks_session_failed() {
    let (storage, manager) = manager();
    let (user, session, document, image) = open_session(&manager, "broken@example.com");
    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));

    let mut corrupted = storage.get_session(session.id).unwrap();
    corrupted.ocr_document_id = Some(9999);
    storage.update_open_session(&corrupted).unwrap();

    assert!(matches!(
        manager.finalize(session.id),
        Err(VerificationError::DataIntegrity(_))
    ));
    let after = manager.get_session(session.id).unwrap();
    assert_eq!(after.status, SessionStatus::Failed);
    assert_eq!(after.failure_reason, Some(FailureReason::IntegrityError));
    assert!(!after.verification_passed);
    after.check_invariants().unwrap();
    assert!(manager.authoritative_result(session.id).unwrap().is_none());
    assert!(!manager.get_user(user.id).unwrap().is_verified);
}

#[test]
fn test_rerecorded_check_is_last_write_wins() {
    let (_, manager) = manager();
    let (_, session, document, image) = open_session(&manager, "retry@example.com");
    let rescan = manager.attach_document(session.id, &doc_upload("rescan.png")).unwrap();

    manager.record_check_result(session.id, &ocr(document.id, 30.0)).unwrap();
    manager.record_check_result(session.id, &ocr(rescan.id, 88.0)).unwrap();
    manager
        .record_check_result(session.id, &liveness(image.id, true, 90.0))
        .unwrap();
    manager
        .record_check_result(session.id, &face(image.id, rescan.id, 85.0))
        .unwrap();

    assert_eq!(manager.get_session(session.id).unwrap().ocr_document_id, Some(rescan.id));
    let result = manager.finalize(session.id).unwrap();
    assert!(result.verification_passed);
    assert_eq!(result.verification_details["ocr"]["document_id"], rescan.id);
    assert_eq!(manager.list_documents(session.id).unwrap().len(), 2);
}

#[test]
fn test_outcome_must_reference_own_rows() {
    let (_, manager) = manager();
    let (_, session, _, _) = open_session(&manager, "mine@example.com");
    let (_, _, foreign_doc, foreign_image) = open_session(&manager, "theirs@example.com");

    assert!(matches!(
        manager.record_check_result(session.id, &ocr(foreign_doc.id, 90.0)),
        Err(VerificationError::ArtifactMismatch(_))
    ));
    assert!(matches!(
        manager.record_check_result(session.id, &liveness(foreign_image.id, true, 90.0)),
        Err(VerificationError::ArtifactMismatch(_))
    ));
    assert!(matches!(
        manager.record_check_result(session.id, &ocr(12345, 90.0)),
        Err(VerificationError::NotFound(_))
    ));
    let after = manager.get_session(session.id).unwrap();
    assert_eq!(after.status, SessionStatus::Pending);
    assert!(after.missing_checks().len() == 3);
}

#[test]
fn test_out_of_range_score_is_malformed() {
    let (_, manager) = manager();
    let (_, session, document, image) = open_session(&manager, "range@example.com");
    assert!(matches!(
        manager.record_check_result(session.id, &ocr(document.id, 150.0)),
        Err(VerificationError::MalformedReport { kind: CheckKind::Ocr, .. })
    ));
    assert!(matches!(
        manager.record_check_result(session.id, &face(image.id, document.id, f64::NAN)),
        Err(VerificationError::MalformedReport { kind: CheckKind::FaceMatch, .. })
    ));
    assert_eq!(manager.get_session(session.id).unwrap().status, SessionStatus::Pending);
}

#[test]
fn test_manual_policy_leaves_user_flag_alone() {
    let (_, manager) = manager_with(UserVerificationPolicy::Manual);
    let (user, session, document, image) = open_session(&manager, "manual@example.com");
    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));
    assert!(manager.finalize(session.id).unwrap().verification_passed);
    assert!(!manager.get_user(user.id).unwrap().is_verified);
}

#[test]
fn test_later_failure_keeps_user_verified() {
    let (_, manager) = manager();
    let (user, session, document, image) = open_session(&manager, "again@example.com");
    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));
    manager.finalize(session.id).unwrap();

    let second = manager.create_session(user.id).unwrap();
    let doc = manager.attach_document(second.id, &doc_upload("p2.png")).unwrap();
    let img = manager.attach_live_image(second.id, &image_upload("s2.jpg")).unwrap();
    record_all(&manager, &second, &doc, &img, (85.0, true, 90.0, 20.0));
    assert!(!manager.finalize(second.id).unwrap().verification_passed);

    assert!(manager.get_user(user.id).unwrap().is_verified);
    let mine = manager.list_sessions(Some(session_filter::by_user(user.id))).unwrap();
    assert_eq!(mine.len(), 2);
    let failed = manager
        .list_sessions(Some(session_filter::by_status(SessionStatus::Failed)))
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure_reason, Some(FailureReason::FaceMatchBelowThreshold));
}

#[test]
fn test_purge_removes_only_old_terminal_sessions() {
    let (_, manager) = manager();
    let (_, done, document, image) = open_session(&manager, "old@example.com");
    record_all(&manager, &done, &document, &image, (85.0, true, 90.0, 82.0));
    manager.finalize(done.id).unwrap();
    let (_, open, _, _) = open_session(&manager, "open@example.com");

    assert_eq!(manager.purge_sessions(Utc::now() - Duration::days(1)).unwrap(), 0);
    assert_eq!(manager.purge_sessions(Utc::now() + Duration::seconds(1)).unwrap(), 1);
    assert!(matches!(manager.get_session(done.id), Err(VerificationError::NotFound(_))));
    assert!(matches!(manager.get_document(document.id), Err(VerificationError::NotFound(_))));
    assert!(manager.get_session(open.id).is_ok());
}

#[test]
fn test_round_trip_on_sqlite_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = Arc::new(DatabaseStorage::new_file(dir.path().join("verify.sqlite3")).unwrap());
    let manager = SessionManager::new(
        storage.clone(),
        Aggregator::default(),
        UserVerificationPolicy::MarkOnPass,
    );
    let (user, session, document, image) = open_session(&manager, "sqlite@example.com");
    record_all(&manager, &session, &document, &image, (85.0, true, 90.0, 82.0));

    let result = manager.finalize(session.id).unwrap();
    assert!(result.verification_passed);
    assert_eq!(result.risk_level, RiskLevel::Low);
    assert!(matches!(
        manager.finalize(session.id),
        Err(VerificationError::SessionAlreadyTerminal)
    ));
    assert!(matches!(
        manager.record_check_result(session.id, &face(image.id, document.id, 10.0)),
        Err(VerificationError::SessionAlreadyTerminal)
    ));

    assert_eq!(storage.list_results(session.id).unwrap().len(), 1);
    assert!(manager.get_user(user.id).unwrap().is_verified);
    let stored = manager.get_session(session.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    stored.check_invariants().unwrap();
    assert_eq!(
        manager.get_live_image(image.id).unwrap().face_coordinates,
        vec![FaceBox { x: 10, y: 20, width: 100, height: 120 }]
    );
}
