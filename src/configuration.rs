pub mod config;
pub mod types;

pub use config::Config;
pub use types::{
    CheckConfig, PolicyConfig, RiskBands, ScoreWeights, StorageConfig, Thresholds, UploadConfig,
    UserVerificationPolicy,
};
