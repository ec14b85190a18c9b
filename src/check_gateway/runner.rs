use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::check_gateway::gateway::{CheckDetails, CheckGateway, CheckInput, CheckReport};
use crate::configuration::types::CheckConfig;
use crate::error_handling::types::{StorageError, VerificationError};
use crate::session_management::session::{
    CheckOutcome, FaceMatchOutcome, LivenessOutcome, OcrOutcome, VerificationSession,
};
use crate::session_management::session_manager::SessionManager;
use crate::session_management::CheckKind;
use crate::storage::file_storage::ArtifactStore;
use crate::storage::types::VerificationResult;

/// The rows a check runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTarget {
    Ocr { document_id: i64 },
    Liveness { live_image_id: i64 },
    FaceMatch { live_image_id: i64, document_id: i64 },
}

impl CheckTarget {
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckTarget::Ocr { .. } => CheckKind::Ocr,
            CheckTarget::Liveness { .. } => CheckKind::Liveness,
            CheckTarget::FaceMatch { .. } => CheckKind::FaceMatch,
        }
    }
}

/// What a successful run left behind.
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub session: VerificationSession,
    /// Set when this run recorded the last check and finalized the session.
    pub result: Option<VerificationResult>,
}

/// Drives check gateways and records their outcomes.
///
/// The manager and the artifact store are synchronous, so every call into
/// them goes through `spawn_blocking`.
pub struct CheckRunner {
    manager: Arc<SessionManager>,
    artifacts: Arc<ArtifactStore>,
    config: CheckConfig,
}

async fn blocking<T, F>(f: F) -> Result<T, VerificationError>
where
    F: FnOnce() -> Result<T, VerificationError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("Blocking store task failed: {}", e);
        VerificationError::Storage(StorageError::ConnectionFailed)
    })?
}

fn malformed(kind: CheckKind, reason: impl Into<String>) -> VerificationError {
    VerificationError::MalformedReport { kind, reason: reason.into() }
}

impl CheckRunner {
    pub fn new(manager: Arc<SessionManager>, artifacts: Arc<ArtifactStore>, config: CheckConfig) -> Self {
        Self { manager, artifacts, config }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    async fn load_input(
        &self,
        session_id: i64,
        target: CheckTarget,
    ) -> Result<CheckInput, VerificationError> {
        let manager = self.manager.clone();
        let artifacts = self.artifacts.clone();
        blocking(move || {
            let session = manager.get_session(session_id)?;
            if session.is_terminal() {
                return Err(VerificationError::SessionAlreadyTerminal);
            }
            let load_document = |id: i64| -> Result<Vec<u8>, VerificationError> {
                let document = manager.get_document(id)?;
                Ok(artifacts.load(&document.file_path)?)
            };
            let load_image = |id: i64| -> Result<Vec<u8>, VerificationError> {
                let image = manager.get_live_image(id)?;
                Ok(artifacts.load(&image.file_path)?)
            };
            let (primary, reference) = match target {
                CheckTarget::Ocr { document_id } => (load_document(document_id)?, None),
                CheckTarget::Liveness { live_image_id } => (load_image(live_image_id)?, None),
                CheckTarget::FaceMatch { live_image_id, document_id } => {
                    (load_image(live_image_id)?, Some(load_document(document_id)?))
                }
            };
            Ok(CheckInput {
                kind: target.kind(),
                session_token: session.session_token,
                primary,
                reference,
            })
        })
        .await
    }

    /// Turns a gateway report into the outcome recorded on the session.
    pub fn outcome_from_report(
        &self,
        target: CheckTarget,
        report: CheckReport,
    ) -> Result<CheckOutcome, VerificationError> {
        let kind = target.kind();
        if report.details.kind() != kind {
            return Err(malformed(
                kind,
                format!("gateway returned {} details", report.details.kind().as_str()),
            ));
        }
        let score = report.score.as_percent();
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(malformed(kind, format!("score out of range: {:?}", report.score)));
        }

        let outcome = match (target, report.details) {
            (
                CheckTarget::Ocr { document_id },
                CheckDetails::Ocr { document_type, is_valid_document, extracted_data_encrypted },
            ) => CheckOutcome::Ocr(OcrOutcome {
                document_id,
                confidence: score,
                document_type,
                is_valid_document,
                extracted_data_encrypted,
            }),
            (
                CheckTarget::Liveness { live_image_id },
                CheckDetails::Liveness { faces_detected, face_boxes, notes },
            ) => {
                let threshold = self.manager.aggregator().thresholds().liveness_confidence;
                CheckOutcome::Liveness(LivenessOutcome {
                    live_image_id,
                    is_live: report.passed_hint && score / 100.0 >= threshold,
                    confidence: score,
                    faces_detected,
                    face_coordinates: face_boxes,
                    details: notes,
                })
            }
            (
                CheckTarget::FaceMatch { live_image_id, document_id },
                CheckDetails::FaceMatch { notes },
            ) => CheckOutcome::FaceMatch(FaceMatchOutcome {
                live_image_id,
                document_id,
                score,
                details: notes,
            }),
            _ => return Err(malformed(kind, "details do not match the target")),
        };
        Ok(outcome)
    }

    /// Runs one check and records its outcome.
    ///
    /// A timeout, a cancellation or an unavailable gateway records nothing.
    /// With `auto_finalize`, the run that lands the last check finalizes the
    /// session; losing that race to another finalizer is not an error.
    ///
    /// `cancel` is honoured until the outcome is handed to the store. Once the
    /// write has started it runs to completion on a blocking thread, even if
    /// this future is dropped.
    pub async fn run_check<G, C>(
        &self,
        gateway: &G,
        session_id: i64,
        target: CheckTarget,
        cancel: C,
    ) -> Result<CheckRun, VerificationError>
    where
        G: CheckGateway,
        C: Future<Output = ()>,
    {
        let kind = target.kind();
        if gateway.kind() != kind {
            return Err(VerificationError::CheckRejected(format!(
                "{} gateway cannot run a {} check",
                gateway.kind().as_str(),
                kind.as_str()
            )));
        }

        let input = self.load_input(session_id, target).await?;
        let token = input.session_token.clone();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        debug!("[{}] Running {} check", token, kind.as_str());

        tokio::pin!(cancel);
        let report = tokio::select! {
            res = tokio::time::timeout(timeout, gateway.run(&input)) => match res {
                Ok(report) => report?,
                Err(_) => {
                    warn!("[{}] {} check timed out after {:?}", token, kind.as_str(), timeout);
                    return Err(VerificationError::CheckTimedOut(kind));
                }
            },
            _ = &mut cancel => {
                info!("[{}] {} check cancelled", token, kind.as_str());
                return Err(VerificationError::CheckCancelled(kind));
            }
        };
        // a cancel that fired alongside the report still wins
        tokio::select! {
            biased;
            _ = &mut cancel => {
                info!("[{}] {} check cancelled before recording", token, kind.as_str());
                return Err(VerificationError::CheckCancelled(kind));
            }
            _ = std::future::ready(()) => {}
        }

        let outcome = self.outcome_from_report(target, report)?;
        let manager = self.manager.clone();
        let auto_finalize = self.config.auto_finalize;
        blocking(move || {
            let session = manager.record_check_result(session_id, &outcome)?;
            if !auto_finalize || !session.all_checks_completed() {
                return Ok(CheckRun { session, result: None });
            }
            match manager.finalize(session_id) {
                Ok(result) => {
                    let session = manager.get_session(session_id)?;
                    Ok(CheckRun { session, result: Some(result) })
                }
                Err(VerificationError::SessionAlreadyTerminal)
                | Err(VerificationError::IncompleteChecks { .. }) => {
                    debug!("[{}] Session finalized by another caller", session.session_token);
                    let session = manager.get_session(session_id)?;
                    Ok(CheckRun { session, result: None })
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Like [`run_check`](Self::run_check), retrying `CheckUnavailable` with
    /// exponential backoff up to `checks.max_attempts` attempts.
    pub async fn run_check_with_retry<G, C>(
        &self,
        gateway: &G,
        session_id: i64,
        target: CheckTarget,
        cancel: C,
    ) -> Result<CheckRun, VerificationError>
    where
        G: CheckGateway,
        C: Future<Output = ()>,
    {
        let kind = target.kind();
        tokio::pin!(cancel);
        let mut attempt: u32 = 1;
        loop {
            match self.run_check(gateway, session_id, target, cancel.as_mut()).await {
                Err(VerificationError::CheckUnavailable(reason))
                    if attempt < self.config.max_attempts =>
                {
                    let factor = 1u64 << (attempt - 1).min(16);
                    let delay =
                        Duration::from_millis(self.config.retry_base_delay_ms.saturating_mul(factor));
                    warn!(
                        "{} check unavailable (attempt {}/{}): {}; retrying in {:?}",
                        kind.as_str(),
                        attempt,
                        self.config.max_attempts,
                        reason,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.as_mut() => return Err(VerificationError::CheckCancelled(kind)),
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
