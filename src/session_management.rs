//! Verification session management core module.
//!
//! This module provides the core types and submodules for driving a verification
//! attempt from creation to its terminal verdict: the session status, the kinds
//! of checks a session waits on, the session record itself and the manager
//! enforcing the state machine.

use serde::{Deserialize, Serialize};

/// Submodule for the session record and its invariants.
pub mod session;
/// Submodule for the session manager implementation.
pub mod session_manager;
#[cfg(test)]
pub mod tests;

/// Represents the current status of a verification session.
///
/// Variants:
/// - `Pending`: created, no check recorded yet.
/// - `InProgress`: at least one check recorded, not finalized.
/// - `Completed`: all checks ran and the verification passed.
/// - `Failed`: all checks ran and the verification did not pass, or stored
///   state was found inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SessionStatus::Pending),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// One of the three checks every session must pass through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Ocr,
    Liveness,
    FaceMatch,
}

impl CheckKind {
    pub const ALL: [CheckKind; 3] = [CheckKind::Ocr, CheckKind::Liveness, CheckKind::FaceMatch];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckKind::Ocr => "ocr",
            CheckKind::Liveness => "liveness",
            CheckKind::FaceMatch => "face_match",
        }
    }
}
