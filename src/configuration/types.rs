use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error_handling::types::ConfigError;

/// Pass/fail thresholds applied by the aggregator and the check runner.
///
/// Scales differ per field and follow the values the checks report:
/// `ocr_confidence` is on 0-100, every other threshold on 0-1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum OCR confidence, 0-100
    pub ocr_confidence: f64,
    /// Minimum face similarity, 0-1
    pub face_match: f64,
    /// Minimum liveness confidence for a capture to count as live, 0-1
    pub liveness_confidence: f64,
    /// Minimum combined score, 0-1
    pub verification_pass: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ocr_confidence: 60.0,
            face_match: 0.6,
            liveness_confidence: 0.7,
            verification_pass: 0.75,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("thresholds.ocr_confidence", self.ocr_confidence, 100.0)?;
        check_range("thresholds.face_match", self.face_match, 1.0)?;
        check_range("thresholds.liveness_confidence", self.liveness_confidence, 1.0)?;
        check_range("thresholds.verification_pass", self.verification_pass, 1.0)
    }
}

/// Relative weight of each normalized sub-score in the overall score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub ocr: f64,
    pub liveness: f64,
    pub face_match: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self { ocr: 1.0, liveness: 1.0, face_match: 1.0 }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.ocr + self.liveness + self.face_match
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("weights.ocr", self.ocr),
            ("weights.liveness", self.liveness),
            ("weights.face_match", self.face_match),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::BadWeights(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.total() <= 0.0 {
            return Err(ConfigError::BadWeights("at least one weight must be positive".into()));
        }
        Ok(())
    }
}

/// Lower bounds of the `low` and `medium` risk bands on the 0-1 overall score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskBands {
    /// Defaults to 0.85 rather than 0.9, so that a passing 85/90/82 session
    /// with default weights (overall about 0.857) rates `low`.
    pub low_min: f64,
    /// Defaults to `thresholds.verification_pass` when unset.
    pub medium_min: Option<f64>,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self { low_min: 0.85, medium_min: None }
    }
}

impl RiskBands {
    pub fn medium_min_or(&self, pass_threshold: f64) -> f64 {
        self.medium_min.unwrap_or(pass_threshold)
    }

    pub fn validate(&self, pass_threshold: f64) -> Result<(), ConfigError> {
        check_range("risk.low_min", self.low_min, 1.0)?;
        let medium_min = self.medium_min_or(pass_threshold);
        check_range("risk.medium_min", medium_min, 1.0)?;
        if self.low_min < medium_min {
            return Err(ConfigError::NonMonotonicRiskBands(format!(
                "risk.low_min ({}) is below risk.medium_min ({})",
                self.low_min, medium_min
            )));
        }
        Ok(())
    }
}

/// Upload directory layout and acceptance rules for artifact files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub upload_dir: PathBuf,
    pub max_id_file_size: u64,
    pub max_live_image_size: u64,
    pub allowed_id_extensions: Vec<String>,
    pub allowed_live_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            max_id_file_size: 10 * 1024 * 1024,
            max_live_image_size: 5 * 1024 * 1024,
            allowed_id_extensions: [".jpg", ".jpeg", ".png", ".pdf"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            allowed_live_extensions: [".jpg", ".jpeg", ".png"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_id_extensions.is_empty() {
            return Err(ConfigError::EmptyExtensionList("uploads.allowed_id_extensions".into()));
        }
        if self.allowed_live_extensions.is_empty() {
            return Err(ConfigError::EmptyExtensionList(
                "uploads.allowed_live_extensions".into(),
            ));
        }
        if self.max_id_file_size == 0 || self.max_live_image_size == 0 {
            return Err(ConfigError::OutOfRange("upload size limits must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./biometric.db?mode=rwc".to_string(),
            max_connections: 5,
            connect_timeout_secs: 10,
        }
    }
}

/// How check gateways are driven by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub timeout_secs: u64,
    /// Attempts made by `run_check_with_retry`, including the first.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Finalize as soon as the third check is recorded.
    pub auto_finalize: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self { timeout_secs: 30, max_attempts: 3, retry_base_delay_ms: 500, auto_finalize: true }
    }
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::OutOfRange("checks.timeout_secs must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::OutOfRange("checks.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// When a finalized session may flip `User.is_verified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserVerificationPolicy {
    /// A passing session marks its user verified; later failures never revoke it.
    #[default]
    MarkOnPass,
    /// The flag is left to an operator.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub user_verification: UserVerificationPolicy,
}

fn check_range(name: &str, value: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 || value > max {
        return Err(ConfigError::OutOfRange(format!(
            "{} must be within 0..={}, got {}",
            name, max, value
        )));
    }
    Ok(())
}
