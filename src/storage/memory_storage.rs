//! In-process record store.
//!
//! All tables live behind one mutex, so every trait call is atomic with respect
//! to the others. Useful for tests and for embedding the core without a database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use crate::error_handling::types::StorageError;
use crate::session_management::session::VerificationSession;
use crate::session_management::SessionStatus;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    Document, DocumentUpload, Finalization, LiveImage, LiveImageUpload, NewSession, NewUser,
    SessionFilter, User, VerificationResult,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    sessions: BTreeMap<i64, VerificationSession>,
    documents: BTreeMap<i64, Document>,
    live_images: BTreeMap<i64, LiveImage>,
    results: BTreeMap<i64, VerificationResult>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables.lock().map_err(|_| {
            error!("Memory storage mutex poisoned");
            StorageError::ConnectionFailed
        })
    }
}

impl Storage for MemoryStorage {
    fn insert_user(&self, user: &NewUser) -> Result<User, StorageError> {
        let mut t = self.lock()?;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StorageError::Conflict);
        }
        let id = t.allocate_id();
        let row = User {
            id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            created_at: Utc::now(),
            is_verified: false,
        };
        t.users.insert(id, row.clone());
        Ok(row)
    }

    fn get_user(&self, id: i64) -> Result<User, StorageError> {
        self.lock()?.users.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    fn insert_session(&self, session: &NewSession) -> Result<VerificationSession, StorageError> {
        let mut t = self.lock()?;
        if !t.users.contains_key(&session.user_id) {
            return Err(StorageError::NotFound);
        }
        if t.sessions.values().any(|s| s.session_token == session.session_token) {
            return Err(StorageError::Conflict);
        }
        let id = t.allocate_id();
        let row = VerificationSession {
            id,
            user_id: session.user_id,
            session_token: session.session_token.clone(),
            status: SessionStatus::Pending,
            created_at: session.created_at,
            completed_at: None,
            ocr_completed: false,
            liveness_completed: false,
            face_match_completed: false,
            verification_passed: false,
            failure_reason: None,
            ocr_document_id: None,
            liveness_image_id: None,
            face_match_image_id: None,
        };
        t.sessions.insert(id, row.clone());
        Ok(row)
    }

    fn get_session(&self, id: i64) -> Result<VerificationSession, StorageError> {
        self.lock()?.sessions.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    fn get_session_by_token(&self, token: &str) -> Result<VerificationSession, StorageError> {
        self.lock()?
            .sessions
            .values()
            .find(|s| s.session_token == token)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn get_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<VerificationSession>, StorageError> {
        let t = self.lock()?;
        let all = t.sessions.len();
        let out: Vec<VerificationSession> = t
            .sessions
            .values()
            .filter(|s| filter.as_ref().map_or(true, |f| f.matches(s)))
            .cloned()
            .collect();
        debug!("Loaded {} session(s), {} after filter", all, out.len());
        Ok(out)
    }

    fn update_open_session(&self, session: &VerificationSession) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let stored = t.sessions.get_mut(&session.id).ok_or(StorageError::NotFound)?;
        if stored.status.is_terminal() {
            return Err(StorageError::Conflict);
        }
        *stored = session.clone();
        Ok(())
    }

    fn insert_document(
        &self,
        session_id: i64,
        upload: &DocumentUpload,
    ) -> Result<Document, StorageError> {
        let mut t = self.lock()?;
        if !t.sessions.contains_key(&session_id) {
            return Err(StorageError::NotFound);
        }
        let id = t.allocate_id();
        let row = Document {
            id,
            session_id,
            file_path: upload.file_path.clone(),
            file_name: upload.file_name.clone(),
            file_type: upload.file_type.clone(),
            file_size: upload.file_size,
            uploaded_at: Utc::now(),
            extracted_data_encrypted: None,
            ocr_confidence: None,
            is_valid_document: false,
            document_type: None,
        };
        t.documents.insert(id, row.clone());
        Ok(row)
    }

    fn get_document(&self, id: i64) -> Result<Document, StorageError> {
        self.lock()?.documents.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    fn update_document(&self, document: &Document) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let stored = t.documents.get_mut(&document.id).ok_or(StorageError::NotFound)?;
        *stored = document.clone();
        Ok(())
    }

    fn list_documents(&self, session_id: i64) -> Result<Vec<Document>, StorageError> {
        Ok(self
            .lock()?
            .documents
            .values()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect())
    }

    fn insert_live_image(
        &self,
        session_id: i64,
        upload: &LiveImageUpload,
    ) -> Result<LiveImage, StorageError> {
        let mut t = self.lock()?;
        if !t.sessions.contains_key(&session_id) {
            return Err(StorageError::NotFound);
        }
        let id = t.allocate_id();
        let row = LiveImage {
            id,
            session_id,
            file_path: upload.file_path.clone(),
            captured_at: Utc::now(),
            is_live: false,
            liveness_confidence: None,
            liveness_details: None,
            faces_detected: 0,
            face_coordinates: Vec::new(),
            face_match_score: None,
            face_match_details: None,
        };
        t.live_images.insert(id, row.clone());
        Ok(row)
    }

    fn get_live_image(&self, id: i64) -> Result<LiveImage, StorageError> {
        self.lock()?.live_images.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    fn update_live_image(&self, image: &LiveImage) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let stored = t.live_images.get_mut(&image.id).ok_or(StorageError::NotFound)?;
        *stored = image.clone();
        Ok(())
    }

    fn list_live_images(&self, session_id: i64) -> Result<Vec<LiveImage>, StorageError> {
        Ok(self
            .lock()?
            .live_images
            .values()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect())
    }

    fn list_results(&self, session_id: i64) -> Result<Vec<VerificationResult>, StorageError> {
        Ok(self
            .lock()?
            .results
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    fn commit_finalization(
        &self,
        finalization: &Finalization,
    ) -> Result<Option<VerificationResult>, StorageError> {
        let mut t = self.lock()?;
        let session = &finalization.session;
        let stored = t.sessions.get(&session.id).ok_or(StorageError::NotFound)?;
        if stored.status.is_terminal() {
            return Err(StorageError::Conflict);
        }
        if finalization.mark_user_verified && !t.users.contains_key(&session.user_id) {
            return Err(StorageError::NotFound);
        }

        let result = match &finalization.result {
            Some(new) => {
                let id = t.allocate_id();
                let row = VerificationResult {
                    id,
                    session_id: new.session_id,
                    created_at: new.created_at,
                    face_match_score: new.face_match_score,
                    face_match_threshold: new.face_match_threshold,
                    face_match_passed: new.face_match_passed,
                    overall_score: new.overall_score,
                    risk_level: new.risk_level,
                    verification_passed: new.verification_passed,
                    verification_details: new.verification_details.clone(),
                    processing_time_ms: new.processing_time_ms,
                    authoritative: new.authoritative,
                };
                t.results.insert(id, row.clone());
                Some(row)
            }
            None => None,
        };
        t.sessions.insert(session.id, session.clone());
        if finalization.mark_user_verified {
            if let Some(user) = t.users.get_mut(&session.user_id) {
                user.is_verified = true;
            }
        }
        Ok(result)
    }

    fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut t = self.lock()?;
        let doomed: Vec<i64> = t
            .sessions
            .values()
            .filter(|s| s.status.is_terminal() && s.completed_at.map_or(false, |c| c < older_than))
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            t.sessions.remove(id);
            t.documents.retain(|_, d| d.session_id != *id);
            t.live_images.retain(|_, i| i.session_id != *id);
            t.results.retain(|_, r| r.session_id != *id);
        }
        info!("Removed {} old session(s) (cutoff: {})", doomed.len(), older_than.to_rfc3339());
        Ok(doomed.len())
    }
}
