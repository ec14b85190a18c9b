use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session_management::session::VerificationSession;
use crate::session_management::SessionStatus;
use crate::verification::types::RiskLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub user_id: i64,
    pub session_token: String,
    pub created_at: DateTime<Utc>,
}

/// An uploaded government ID document and what OCR made of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub session_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// Opaque blob sealed by the OCR gateway; never decrypted here.
    pub extracted_data_encrypted: Option<Vec<u8>>,
    /// 0-100
    pub ocr_confidence: Option<f64>,
    pub is_valid_document: bool,
    pub document_type: Option<String>,
}

/// Metadata for a document file that was already written to the artifact store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
}

/// Pixel-space bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A live capture used both for liveness detection and face matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveImage {
    pub id: i64,
    pub session_id: i64,
    pub file_path: String,
    pub captured_at: DateTime<Utc>,
    pub is_live: bool,
    /// 0-100
    pub liveness_confidence: Option<f64>,
    pub liveness_details: Option<serde_json::Value>,
    pub faces_detected: u32,
    pub face_coordinates: Vec<FaceBox>,
    /// 0-100, similarity against the session's ID document
    pub face_match_score: Option<f64>,
    pub face_match_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveImageUpload {
    pub file_path: String,
}

/// A finalize outcome. Rows are append-only; `authoritative` marks the one
/// that decided the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub id: i64,
    pub session_id: i64,
    pub created_at: DateTime<Utc>,
    pub face_match_score: f64,
    /// Snapshot of the threshold in effect, on the 0-100 scale of `face_match_score`.
    pub face_match_threshold: f64,
    pub face_match_passed: bool,
    /// 0-1
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub verification_passed: bool,
    pub verification_details: serde_json::Value,
    pub processing_time_ms: i64,
    pub authoritative: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVerificationResult {
    pub session_id: i64,
    pub created_at: DateTime<Utc>,
    pub face_match_score: f64,
    pub face_match_threshold: f64,
    pub face_match_passed: bool,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub verification_passed: bool,
    pub verification_details: serde_json::Value,
    pub processing_time_ms: i64,
    pub authoritative: bool,
}

/// Everything `finalize` writes, committed atomically by the store.
///
/// The store must refuse the commit with `StorageError::Conflict` when the
/// stored session is already terminal.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub session: VerificationSession,
    pub result: Option<NewVerificationResult>,
    pub mark_user_verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub user_id: Option<i64>,
    pub status: Option<SessionStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl SessionFilter {
    pub fn matches(&self, session: &VerificationSession) -> bool {
        if let Some(user_id) = self.user_id {
            if session.user_id != user_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if session.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if session.created_at > before {
                return false;
            }
        }
        true
    }
}
