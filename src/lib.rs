pub mod check_gateway;
pub use check_gateway::{CheckGateway, CheckReport, CheckRunner, CheckTarget};

pub mod configuration;
pub use configuration::Config;

pub mod error_handling;
pub use error_handling::{StorageError, VerificationError};

pub mod session_management;
pub use session_management::session_manager::SessionManager;
pub use session_management::{CheckKind, SessionStatus};

pub mod storage;
pub use storage::storage_trait::Storage;

pub mod verification;
pub use verification::{Aggregator, FailureReason, RiskLevel, Verdict};
