use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::CheckError;
use crate::session_management::CheckKind;
use crate::storage::types::FaceBox;

/// Score as reported by a detector; vendors disagree on the scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scale", content = "value", rename_all = "snake_case")]
pub enum Score {
    /// 0-100
    Percent(f64),
    /// 0-1
    Unit(f64),
}

impl Score {
    pub fn as_percent(self) -> f64 {
        match self {
            Score::Percent(v) => v,
            Score::Unit(v) => v * 100.0,
        }
    }
}

/// Check-specific payload of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckDetails {
    Ocr {
        document_type: Option<String>,
        is_valid_document: bool,
        /// Sealed by the gateway, stored as-is
        extracted_data_encrypted: Option<Vec<u8>>,
    },
    Liveness {
        faces_detected: u32,
        face_boxes: Vec<FaceBox>,
        notes: Option<serde_json::Value>,
    },
    FaceMatch {
        notes: Option<serde_json::Value>,
    },
}

impl CheckDetails {
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckDetails::Ocr { .. } => CheckKind::Ocr,
            CheckDetails::Liveness { .. } => CheckKind::Liveness,
            CheckDetails::FaceMatch { .. } => CheckKind::FaceMatch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub score: Score,
    /// The detector's own pass/fail opinion.
    pub passed_hint: bool,
    pub details: CheckDetails,
}

/// Artifact bytes handed to a gateway.
///
/// `primary` is the ID document for OCR and the live capture for liveness and
/// face match; `reference` carries the ID document for face match only.
#[derive(Debug, Clone)]
pub struct CheckInput {
    pub kind: CheckKind,
    pub session_token: String,
    pub primary: Vec<u8>,
    pub reference: Option<Vec<u8>>,
}

/// An OCR, liveness or face-match detector.
pub trait CheckGateway: Send + Sync {
    fn kind(&self) -> CheckKind;

    fn run(
        &self,
        input: &CheckInput,
    ) -> impl Future<Output = Result<CheckReport, CheckError>> + Send;
}
