use super::types::*;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error_handling::types::ConfigError;

/// Application configuration structure that defines all runtime parameters.
///
/// This structure holds the complete configuration for the verification core:
/// where records and uploads are stored, every threshold the aggregator applies,
/// how check gateways are driven, and the user verification policy. It is read
/// from a TOML file; every section and every field is optional and falls back
/// to the defaults below.
///
/// # Examples
///
/// ```
/// use bioverify::configuration::config::Config;
///
/// let config = Config::from_toml_str(
///     r#"
///     [thresholds]
///     face_match = 0.7
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.thresholds.face_match, 0.7);
/// assert_eq!(config.thresholds.ocr_confidence, 60.0);
/// ```
///
/// # Fields Overview
///
/// - `storage`: database URL and connection pool sizing
/// - `uploads`: upload directory, per-kind size limits and allowed extensions
/// - `thresholds`: OCR, face-match, liveness and overall pass thresholds
/// - `weights`: relative weight of each sub-score in the overall score
/// - `risk`: lower bounds of the `low` and `medium` risk bands
/// - `checks`: gateway timeout, retry policy and auto-finalize
/// - `policy`: when a passing session marks its user verified
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
    pub thresholds: Thresholds,
    pub weights: ScoreWeights,
    pub risk: RiskBands,
    pub checks: CheckConfig,
    pub policy: PolicyConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line or environment overrides on top of the file values.
    pub fn with_overrides(
        mut self,
        database_url: Option<String>,
        upload_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(url) = database_url {
            self.storage.database_url = url;
        }
        if let Some(dir) = upload_dir {
            self.uploads.upload_dir = dir;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.weights.validate()?;
        self.risk.validate(self.thresholds.verification_pass)?;
        self.uploads.validate()?;
        self.checks.validate()?;
        if self.storage.max_connections == 0 {
            return Err(ConfigError::OutOfRange(
                "storage.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
