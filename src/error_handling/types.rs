use std::fmt;

use crate::session_management::CheckKind;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    OutOfRange(String),
    BadWeights(String),
    NonMonotonicRiskBands(String),
    EmptyExtensionList(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::OutOfRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::BadWeights(e) => write!(f, "Score weight error: {}", e),
            ConfigError::NonMonotonicRiskBands(e) => write!(f, "Risk band error: {}", e),
            ConfigError::EmptyExtensionList(e) => write!(f, "Upload extension error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
    /// No row with the given key.
    NotFound,
    /// A unique constraint or a guarded update refused the write.
    Conflict,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::NotFound => write!(f, "Storage record not found"),
            StorageError::Conflict => write!(f, "Storage write conflict"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ArtifactError {
    IoError(std::io::Error),
    TooLarge { size: u64, limit: u64 },
    ExtensionNotAllowed(String),
    OutsideUploadRoot(String),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::IoError(e) => write!(f, "Artifact IO error: {}", e),
            ArtifactError::TooLarge { size, limit } => {
                write!(f, "Artifact of {} bytes exceeds the {} byte limit", size, limit)
            }
            ArtifactError::ExtensionNotAllowed(name) => {
                write!(f, "File extension not allowed: {}", name)
            }
            ArtifactError::OutsideUploadRoot(path) => {
                write!(f, "Path is outside the upload directory: {}", path)
            }
        }
    }
}

impl std::error::Error for ArtifactError {}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::IoError(err)
    }
}

/// Errors reported by a check gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// Transient upstream failure; the caller may retry.
    Unavailable(String),
    /// The gateway could not process the artifact it was given.
    InvalidInput(String),
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::Unavailable(e) => write!(f, "Check gateway unavailable: {}", e),
            CheckError::InvalidInput(e) => write!(f, "Check gateway rejected input: {}", e),
        }
    }
}

impl std::error::Error for CheckError {}

#[derive(Debug)]
pub enum VerificationError {
    /// The generated session token collided with an existing one.
    DuplicateToken,
    /// The session is `completed` or `failed` and can no longer change.
    SessionAlreadyTerminal,
    /// `finalize` was called before every check reported.
    IncompleteChecks { missing: Vec<CheckKind> },
    /// Stored state contradicts itself; needs operator attention.
    DataIntegrity(String),
    CheckUnavailable(String),
    /// The gateway refused the artifact; retrying the same input will not help.
    CheckRejected(String),
    CheckTimedOut(CheckKind),
    CheckCancelled(CheckKind),
    MalformedReport { kind: CheckKind, reason: String },
    /// A referenced document or live image belongs to another session.
    ArtifactMismatch(String),
    NotFound(String),
    Storage(StorageError),
    Artifact(ArtifactError),
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::DuplicateToken => write!(f, "Session token already in use"),
            VerificationError::SessionAlreadyTerminal => {
                write!(f, "Session is already completed or failed")
            }
            VerificationError::IncompleteChecks { missing } => {
                let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
                write!(f, "Checks not yet completed: {}", names.join(", "))
            }
            VerificationError::DataIntegrity(e) => write!(f, "Data integrity error: {}", e),
            VerificationError::CheckUnavailable(e) => write!(f, "Check unavailable: {}", e),
            VerificationError::CheckRejected(e) => write!(f, "Check rejected input: {}", e),
            VerificationError::CheckTimedOut(kind) => {
                write!(f, "Check {} timed out", kind.as_str())
            }
            VerificationError::CheckCancelled(kind) => {
                write!(f, "Check {} was cancelled", kind.as_str())
            }
            VerificationError::MalformedReport { kind, reason } => {
                write!(f, "Malformed {} report: {}", kind.as_str(), reason)
            }
            VerificationError::ArtifactMismatch(e) => write!(f, "Artifact mismatch: {}", e),
            VerificationError::NotFound(e) => write!(f, "Not found: {}", e),
            VerificationError::Storage(e) => write!(f, "Storage error: {}", e),
            VerificationError::Artifact(e) => write!(f, "Artifact error: {}", e),
        }
    }
}

impl std::error::Error for VerificationError {}

impl From<StorageError> for VerificationError {
    fn from(err: StorageError) -> Self {
        VerificationError::Storage(err)
    }
}

impl From<ArtifactError> for VerificationError {
    fn from(err: ArtifactError) -> Self {
        VerificationError::Artifact(err)
    }
}

impl From<CheckError> for VerificationError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Unavailable(e) => VerificationError::CheckUnavailable(e),
            CheckError::InvalidInput(e) => VerificationError::CheckRejected(e),
        }
    }
}

impl VerificationError {
    /// Whether a caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerificationError::DuplicateToken
                | VerificationError::CheckUnavailable(_)
                | VerificationError::CheckTimedOut(_)
        )
    }
}
