//! Storage Trait
//!
//! This module defines the `Storage` trait, the record store behind the
//! verification core.
//!
//! Implementors of this trait are responsible for:
//! - Persisting users, sessions, documents, live images and results
//! - Looking records up by primary key, by session token and by parent session
//! - Refusing writes that would modify a terminal session
//! - Committing a finalization atomically
//! - Cleaning up old terminal sessions
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::error_handling::types::StorageError;
use crate::session_management::session::VerificationSession;
use crate::storage::types::{
    Document, DocumentUpload, Finalization, LiveImage, LiveImageUpload, NewSession, NewUser,
    SessionFilter, User, VerificationResult,
};
use chrono::{DateTime, Utc};

/// The `Storage` trait defines the interface for record store backends.
///
/// Uniqueness violations (duplicate email, duplicate session token) and guarded
/// updates that hit a terminal session are reported as `StorageError::Conflict`;
/// missing rows as `StorageError::NotFound`.
pub trait Storage: Send + Sync {
    fn insert_user(&self, user: &NewUser) -> Result<User, StorageError>;

    fn get_user(&self, id: i64) -> Result<User, StorageError>;

    fn insert_session(&self, session: &NewSession) -> Result<VerificationSession, StorageError>;

    fn get_session(&self, id: i64) -> Result<VerificationSession, StorageError>;

    fn get_session_by_token(&self, token: &str) -> Result<VerificationSession, StorageError>;

    /// Retrieves sessions, optionally filtered.
    fn get_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<VerificationSession>, StorageError>;

    /// Overwrites a session that is still open in the store.
    ///
    /// Fails with `Conflict` when the stored row is already terminal.
    fn update_open_session(&self, session: &VerificationSession) -> Result<(), StorageError>;

    fn insert_document(
        &self,
        session_id: i64,
        upload: &DocumentUpload,
    ) -> Result<Document, StorageError>;

    fn get_document(&self, id: i64) -> Result<Document, StorageError>;

    fn update_document(&self, document: &Document) -> Result<(), StorageError>;

    fn list_documents(&self, session_id: i64) -> Result<Vec<Document>, StorageError>;

    fn insert_live_image(
        &self,
        session_id: i64,
        upload: &LiveImageUpload,
    ) -> Result<LiveImage, StorageError>;

    fn get_live_image(&self, id: i64) -> Result<LiveImage, StorageError>;

    fn update_live_image(&self, image: &LiveImage) -> Result<(), StorageError>;

    fn list_live_images(&self, session_id: i64) -> Result<Vec<LiveImage>, StorageError>;

    /// All result rows of a session, oldest first.
    fn list_results(&self, session_id: i64) -> Result<Vec<VerificationResult>, StorageError>;

    /// Writes the terminal session, the optional result row and the user flag
    /// in one atomic step.
    ///
    /// Fails with `Conflict`, writing nothing, when the stored session is
    /// already terminal.
    fn commit_finalization(
        &self,
        finalization: &Finalization,
    ) -> Result<Option<VerificationResult>, StorageError>;

    /// Removes terminal sessions completed before `older_than`, with their
    /// documents, live images and results. Returns the number of sessions removed.
    fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError>;
}
