//! Error types shared by every subsystem.

pub mod types;

pub use types::{ArtifactError, CheckError, ConfigError, StorageError, VerificationError};
