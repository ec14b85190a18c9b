use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Schema, SqlErr, TransactionTrait,
};

use crate::configuration::types::StorageConfig;
use crate::error_handling::types::StorageError;
use crate::session_management::session::VerificationSession;
use crate::session_management::SessionStatus;
use crate::storage::db_entities::{
    documents, live_images, users, verification_results, verification_sessions,
};
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    Document, DocumentUpload, FaceBox, Finalization, LiveImage, LiveImageUpload, NewSession,
    NewUser, SessionFilter, User, VerificationResult,
};
use crate::verification::types::{FailureReason, RiskLevel};

const TERMINAL_STATUSES: [&str; 2] = ["completed", "failed"];

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            error!("Invalid timestamp {:?} in database: {}", raw, e);
            StorageError::ReadFailed
        })
}

fn read_err(context: &str, e: DbErr) -> StorageError {
    error!("{}: {}", context, e);
    StorageError::ReadFailed
}

fn write_err(context: &str, e: DbErr) -> StorageError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            debug!("{}: unique constraint violated ({})", context, detail);
            StorageError::Conflict
        }
        _ => match e {
            DbErr::RecordNotUpdated => StorageError::NotFound,
            other => {
                error!("{}: {}", context, other);
                StorageError::WriteFailed
            }
        },
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| {
        error!("Failed to encode JSON column: {}", e);
        StorageError::WriteFailed
    })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| {
        error!("Invalid JSON column in database: {}", e);
        StorageError::ReadFailed
    })
}

fn user_from_model(m: users::Model) -> Result<User, StorageError> {
    Ok(User {
        id: m.id,
        email: m.email,
        full_name: m.full_name,
        phone: m.phone,
        created_at: parse_ts(&m.created_at)?,
        is_verified: m.is_verified,
    })
}

fn session_from_model(m: verification_sessions::Model) -> Result<VerificationSession, StorageError> {
    let status = SessionStatus::parse(&m.status).ok_or_else(|| {
        error!("Unknown session status {:?} for session {}", m.status, m.id);
        StorageError::ReadFailed
    })?;
    let failure_reason = m
        .failure_reason
        .as_deref()
        .map(|r| {
            FailureReason::parse(r).ok_or_else(|| {
                error!("Unknown failure reason {:?} for session {}", r, m.id);
                StorageError::ReadFailed
            })
        })
        .transpose()?;
    Ok(VerificationSession {
        id: m.id,
        user_id: m.user_id,
        session_token: m.session_token,
        status,
        created_at: parse_ts(&m.created_at)?,
        completed_at: m.completed_at.as_deref().map(parse_ts).transpose()?,
        ocr_completed: m.ocr_completed,
        liveness_completed: m.liveness_completed,
        face_match_completed: m.face_match_completed,
        verification_passed: m.verification_passed,
        failure_reason,
        ocr_document_id: m.ocr_document_id,
        liveness_image_id: m.liveness_image_id,
        face_match_image_id: m.face_match_image_id,
    })
}

/// Every mutable column of a session; the primary key is left unset.
fn session_changes(s: &VerificationSession) -> verification_sessions::ActiveModel {
    verification_sessions::ActiveModel {
        id: NotSet,
        user_id: Set(s.user_id),
        session_token: Set(s.session_token.clone()),
        status: Set(s.status.as_str().to_string()),
        created_at: Set(fmt_ts(s.created_at)),
        completed_at: Set(s.completed_at.map(fmt_ts)),
        ocr_completed: Set(s.ocr_completed),
        liveness_completed: Set(s.liveness_completed),
        face_match_completed: Set(s.face_match_completed),
        verification_passed: Set(s.verification_passed),
        failure_reason: Set(s.failure_reason.map(|r| r.as_str().to_string())),
        ocr_document_id: Set(s.ocr_document_id),
        liveness_image_id: Set(s.liveness_image_id),
        face_match_image_id: Set(s.face_match_image_id),
    }
}

fn document_from_model(m: documents::Model) -> Result<Document, StorageError> {
    Ok(Document {
        id: m.id,
        session_id: m.session_id,
        file_path: m.file_path,
        file_name: m.file_name,
        file_type: m.file_type,
        file_size: u64::try_from(m.file_size).map_err(|_| StorageError::ReadFailed)?,
        uploaded_at: parse_ts(&m.uploaded_at)?,
        extracted_data_encrypted: m.extracted_data_encrypted,
        ocr_confidence: m.ocr_confidence,
        is_valid_document: m.is_valid_document,
        document_type: m.document_type,
    })
}

fn live_image_from_model(m: live_images::Model) -> Result<LiveImage, StorageError> {
    let face_coordinates: Vec<FaceBox> = from_json(&m.face_coordinates)?;
    Ok(LiveImage {
        id: m.id,
        session_id: m.session_id,
        file_path: m.file_path,
        captured_at: parse_ts(&m.captured_at)?,
        is_live: m.is_live,
        liveness_confidence: m.liveness_confidence,
        liveness_details: m.liveness_details.as_deref().map(from_json).transpose()?,
        faces_detected: u32::try_from(m.faces_detected).map_err(|_| StorageError::ReadFailed)?,
        face_coordinates,
        face_match_score: m.face_match_score,
        face_match_details: m.face_match_details.as_deref().map(from_json).transpose()?,
    })
}

fn result_from_model(m: verification_results::Model) -> Result<VerificationResult, StorageError> {
    let risk_level = RiskLevel::parse(&m.risk_level).ok_or_else(|| {
        error!("Unknown risk level {:?} for result {}", m.risk_level, m.id);
        StorageError::ReadFailed
    })?;
    Ok(VerificationResult {
        id: m.id,
        session_id: m.session_id,
        created_at: parse_ts(&m.created_at)?,
        face_match_score: m.face_match_score,
        face_match_threshold: m.face_match_threshold,
        face_match_passed: m.face_match_passed,
        overall_score: m.overall_score,
        risk_level,
        verification_passed: m.verification_passed,
        verification_details: from_json(&m.verification_details)?,
        processing_time_ms: m.processing_time_ms,
        authoritative: m.authoritative,
    })
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let mut stmt = Schema::new(backend).create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// SQLite record store built on SeaORM.
///
/// The trait is synchronous; calls are driven on a private current-thread
/// runtime, so this type must not be used from inside another runtime's async
/// context (wrap calls in `spawn_blocking` there).
pub struct DatabaseStorage {
    // dropped before the runtime it was opened on
    db: DatabaseConnection,
    rt: tokio::runtime::Runtime,
}

impl DatabaseStorage {
    /// Create or open a SQLite file, creating parent directories as needed.
    pub fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
        }
        Self::connect(&StorageConfig {
            database_url: format!("sqlite://{}?mode=rwc", path_ref.display()),
            ..StorageConfig::default()
        })
    }

    /// Opens the configured database and creates missing tables.
    pub fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|_| StorageError::ConnectionFailed)?;
        let db = rt.block_on(async {
            let mut opts = ConnectOptions::new(config.database_url.clone());
            // every pooled connection to :memory: would see its own database
            let max_connections = if config.database_url.contains(":memory:") {
                1
            } else {
                config.max_connections
            };
            opts.max_connections(max_connections)
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .sqlx_logging(false);
            let db = Database::connect(opts).await.map_err(|e| {
                error!("Unable to open database {}: {}", config.database_url, e);
                StorageError::ConnectionFailed
            })?;
            create_table(&db, users::Entity).await.map_err(|e| write_err("create users", e))?;
            create_table(&db, verification_sessions::Entity)
                .await
                .map_err(|e| write_err("create verification_sessions", e))?;
            create_table(&db, documents::Entity)
                .await
                .map_err(|e| write_err("create documents", e))?;
            create_table(&db, live_images::Entity)
                .await
                .map_err(|e| write_err("create live_images", e))?;
            create_table(&db, verification_results::Entity)
                .await
                .map_err(|e| write_err("create verification_results", e))?;
            Ok::<_, StorageError>(db)
        })?;
        info!("Database storage ready at {}", config.database_url);
        Ok(Self { rt, db })
    }
}

impl Storage for DatabaseStorage {
    fn insert_user(&self, user: &NewUser) -> Result<User, StorageError> {
        self.rt.block_on(async {
            let model = users::ActiveModel {
                id: NotSet,
                email: Set(user.email.clone()),
                full_name: Set(user.full_name.clone()),
                phone: Set(user.phone.clone()),
                created_at: Set(fmt_ts(Utc::now())),
                is_verified: Set(false),
            }
            .insert(&self.db)
            .await
            .map_err(|e| write_err("insert user", e))?;
            user_from_model(model)
        })
    }

    fn get_user(&self, id: i64) -> Result<User, StorageError> {
        self.rt.block_on(async {
            let model = users::Entity::find_by_id(id)
                .one(&self.db)
                .await
                .map_err(|e| read_err("get user", e))?
                .ok_or(StorageError::NotFound)?;
            user_from_model(model)
        })
    }

    fn insert_session(&self, session: &NewSession) -> Result<VerificationSession, StorageError> {
        self.rt.block_on(async {
            users::Entity::find_by_id(session.user_id)
                .one(&self.db)
                .await
                .map_err(|e| read_err("get user", e))?
                .ok_or(StorageError::NotFound)?;
            let model = verification_sessions::ActiveModel {
                id: NotSet,
                user_id: Set(session.user_id),
                session_token: Set(session.session_token.clone()),
                status: Set(SessionStatus::Pending.as_str().to_string()),
                created_at: Set(fmt_ts(session.created_at)),
                completed_at: Set(None),
                ocr_completed: Set(false),
                liveness_completed: Set(false),
                face_match_completed: Set(false),
                verification_passed: Set(false),
                failure_reason: Set(None),
                ocr_document_id: Set(None),
                liveness_image_id: Set(None),
                face_match_image_id: Set(None),
            }
            .insert(&self.db)
            .await
            .map_err(|e| write_err("insert session", e))?;
            session_from_model(model)
        })
    }

    fn get_session(&self, id: i64) -> Result<VerificationSession, StorageError> {
        self.rt.block_on(async {
            let model = verification_sessions::Entity::find_by_id(id)
                .one(&self.db)
                .await
                .map_err(|e| read_err("get session", e))?
                .ok_or(StorageError::NotFound)?;
            session_from_model(model)
        })
    }

    fn get_session_by_token(&self, token: &str) -> Result<VerificationSession, StorageError> {
        self.rt.block_on(async {
            let model = verification_sessions::Entity::find()
                .filter(verification_sessions::Column::SessionToken.eq(token))
                .one(&self.db)
                .await
                .map_err(|e| read_err("get session by token", e))?
                .ok_or(StorageError::NotFound)?;
            session_from_model(model)
        })
    }

    fn get_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<VerificationSession>, StorageError> {
        use verification_sessions::Column;
        self.rt.block_on(async {
            let mut query = verification_sessions::Entity::find();
            if let Some(f) = &filter {
                if let Some(user_id) = f.user_id {
                    query = query.filter(Column::UserId.eq(user_id));
                }
                if let Some(status) = f.status {
                    query = query.filter(Column::Status.eq(status.as_str()));
                }
                if let Some(after) = f.created_after {
                    query = query.filter(Column::CreatedAt.gte(fmt_ts(after)));
                }
                if let Some(before) = f.created_before {
                    query = query.filter(Column::CreatedAt.lte(fmt_ts(before)));
                }
            }
            let rows = query
                .order_by_asc(Column::Id)
                .all(&self.db)
                .await
                .map_err(|e| read_err("list sessions", e))?;
            rows.into_iter().map(session_from_model).collect()
        })
    }

    fn update_open_session(&self, session: &VerificationSession) -> Result<(), StorageError> {
        use verification_sessions::Column;
        self.rt.block_on(async {
            let res = verification_sessions::Entity::update_many()
                .set(session_changes(session))
                .filter(Column::Id.eq(session.id))
                .filter(Column::Status.is_not_in(TERMINAL_STATUSES))
                .exec(&self.db)
                .await
                .map_err(|e| write_err("update session", e))?;
            if res.rows_affected == 0 {
                let exists = verification_sessions::Entity::find_by_id(session.id)
                    .one(&self.db)
                    .await
                    .map_err(|e| read_err("get session", e))?;
                return Err(if exists.is_some() {
                    StorageError::Conflict
                } else {
                    StorageError::NotFound
                });
            }
            Ok(())
        })
    }

    fn insert_document(
        &self,
        session_id: i64,
        upload: &DocumentUpload,
    ) -> Result<Document, StorageError> {
        self.rt.block_on(async {
            verification_sessions::Entity::find_by_id(session_id)
                .one(&self.db)
                .await
                .map_err(|e| read_err("get session", e))?
                .ok_or(StorageError::NotFound)?;
            let model = documents::ActiveModel {
                id: NotSet,
                session_id: Set(session_id),
                file_path: Set(upload.file_path.clone()),
                file_name: Set(upload.file_name.clone()),
                file_type: Set(upload.file_type.clone()),
                file_size: Set(i64::try_from(upload.file_size)
                    .map_err(|_| StorageError::WriteFailed)?),
                uploaded_at: Set(fmt_ts(Utc::now())),
                extracted_data_encrypted: Set(None),
                ocr_confidence: Set(None),
                is_valid_document: Set(false),
                document_type: Set(None),
            }
            .insert(&self.db)
            .await
            .map_err(|e| write_err("insert document", e))?;
            document_from_model(model)
        })
    }

    fn get_document(&self, id: i64) -> Result<Document, StorageError> {
        self.rt.block_on(async {
            let model = documents::Entity::find_by_id(id)
                .one(&self.db)
                .await
                .map_err(|e| read_err("get document", e))?
                .ok_or(StorageError::NotFound)?;
            document_from_model(model)
        })
    }

    fn update_document(&self, document: &Document) -> Result<(), StorageError> {
        self.rt.block_on(async {
            documents::ActiveModel {
                id: Set(document.id),
                session_id: Set(document.session_id),
                file_path: Set(document.file_path.clone()),
                file_name: Set(document.file_name.clone()),
                file_type: Set(document.file_type.clone()),
                file_size: Set(i64::try_from(document.file_size)
                    .map_err(|_| StorageError::WriteFailed)?),
                uploaded_at: Set(fmt_ts(document.uploaded_at)),
                extracted_data_encrypted: Set(document.extracted_data_encrypted.clone()),
                ocr_confidence: Set(document.ocr_confidence),
                is_valid_document: Set(document.is_valid_document),
                document_type: Set(document.document_type.clone()),
            }
            .update(&self.db)
            .await
            .map_err(|e| write_err("update document", e))?;
            Ok(())
        })
    }

    fn list_documents(&self, session_id: i64) -> Result<Vec<Document>, StorageError> {
        self.rt.block_on(async {
            let rows = documents::Entity::find()
                .filter(documents::Column::SessionId.eq(session_id))
                .order_by_asc(documents::Column::Id)
                .all(&self.db)
                .await
                .map_err(|e| read_err("list documents", e))?;
            rows.into_iter().map(document_from_model).collect()
        })
    }

    fn insert_live_image(
        &self,
        session_id: i64,
        upload: &LiveImageUpload,
    ) -> Result<LiveImage, StorageError> {
        self.rt.block_on(async {
            verification_sessions::Entity::find_by_id(session_id)
                .one(&self.db)
                .await
                .map_err(|e| read_err("get session", e))?
                .ok_or(StorageError::NotFound)?;
            let model = live_images::ActiveModel {
                id: NotSet,
                session_id: Set(session_id),
                file_path: Set(upload.file_path.clone()),
                captured_at: Set(fmt_ts(Utc::now())),
                is_live: Set(false),
                liveness_confidence: Set(None),
                liveness_details: Set(None),
                faces_detected: Set(0),
                face_coordinates: Set("[]".to_string()),
                face_match_score: Set(None),
                face_match_details: Set(None),
            }
            .insert(&self.db)
            .await
            .map_err(|e| write_err("insert live image", e))?;
            live_image_from_model(model)
        })
    }

    fn get_live_image(&self, id: i64) -> Result<LiveImage, StorageError> {
        self.rt.block_on(async {
            let model = live_images::Entity::find_by_id(id)
                .one(&self.db)
                .await
                .map_err(|e| read_err("get live image", e))?
                .ok_or(StorageError::NotFound)?;
            live_image_from_model(model)
        })
    }

    fn update_live_image(&self, image: &LiveImage) -> Result<(), StorageError> {
        self.rt.block_on(async {
            live_images::ActiveModel {
                id: Set(image.id),
                session_id: Set(image.session_id),
                file_path: Set(image.file_path.clone()),
                captured_at: Set(fmt_ts(image.captured_at)),
                is_live: Set(image.is_live),
                liveness_confidence: Set(image.liveness_confidence),
                liveness_details: Set(image.liveness_details.as_ref().map(to_json).transpose()?),
                faces_detected: Set(i32::try_from(image.faces_detected)
                    .map_err(|_| StorageError::WriteFailed)?),
                face_coordinates: Set(to_json(&image.face_coordinates)?),
                face_match_score: Set(image.face_match_score),
                face_match_details: Set(image
                    .face_match_details
                    .as_ref()
                    .map(to_json)
                    .transpose()?),
            }
            .update(&self.db)
            .await
            .map_err(|e| write_err("update live image", e))?;
            Ok(())
        })
    }

    fn list_live_images(&self, session_id: i64) -> Result<Vec<LiveImage>, StorageError> {
        self.rt.block_on(async {
            let rows = live_images::Entity::find()
                .filter(live_images::Column::SessionId.eq(session_id))
                .order_by_asc(live_images::Column::Id)
                .all(&self.db)
                .await
                .map_err(|e| read_err("list live images", e))?;
            rows.into_iter().map(live_image_from_model).collect()
        })
    }

    fn list_results(&self, session_id: i64) -> Result<Vec<VerificationResult>, StorageError> {
        self.rt.block_on(async {
            let rows = verification_results::Entity::find()
                .filter(verification_results::Column::SessionId.eq(session_id))
                .order_by_asc(verification_results::Column::Id)
                .all(&self.db)
                .await
                .map_err(|e| read_err("list results", e))?;
            rows.into_iter().map(result_from_model).collect()
        })
    }

    fn commit_finalization(
        &self,
        finalization: &Finalization,
    ) -> Result<Option<VerificationResult>, StorageError> {
        use verification_sessions::Column;
        let session = &finalization.session;
        self.rt.block_on(async {
            let txn = self
                .db
                .begin()
                .await
                .map_err(|e| write_err("begin finalization", e))?;

            let res = verification_sessions::Entity::update_many()
                .set(session_changes(session))
                .filter(Column::Id.eq(session.id))
                .filter(Column::Status.is_not_in(TERMINAL_STATUSES))
                .exec(&txn)
                .await
                .map_err(|e| write_err("finalize session", e))?;
            if res.rows_affected == 0 {
                let exists = verification_sessions::Entity::find_by_id(session.id)
                    .one(&txn)
                    .await
                    .map_err(|e| read_err("get session", e))?;
                return Err(if exists.is_some() {
                    StorageError::Conflict
                } else {
                    StorageError::NotFound
                });
            }

            let result = match &finalization.result {
                Some(new) => {
                    let model = verification_results::ActiveModel {
                        id: NotSet,
                        session_id: Set(new.session_id),
                        created_at: Set(fmt_ts(new.created_at)),
                        face_match_score: Set(new.face_match_score),
                        face_match_threshold: Set(new.face_match_threshold),
                        face_match_passed: Set(new.face_match_passed),
                        overall_score: Set(new.overall_score),
                        risk_level: Set(new.risk_level.as_str().to_string()),
                        verification_passed: Set(new.verification_passed),
                        verification_details: Set(to_json(&new.verification_details)?),
                        processing_time_ms: Set(new.processing_time_ms),
                        authoritative: Set(new.authoritative),
                    }
                    .insert(&txn)
                    .await
                    .map_err(|e| write_err("insert result", e))?;
                    Some(result_from_model(model)?)
                }
                None => None,
            };

            if finalization.mark_user_verified {
                let res = users::Entity::update_many()
                    .set(users::ActiveModel { is_verified: Set(true), ..Default::default() })
                    .filter(users::Column::Id.eq(session.user_id))
                    .exec(&txn)
                    .await
                    .map_err(|e| write_err("mark user verified", e))?;
                if res.rows_affected == 0 {
                    return Err(StorageError::NotFound);
                }
            }

            txn.commit().await.map_err(|e| write_err("commit finalization", e))?;
            debug!("[{}] Finalization committed", session.session_token);
            Ok(result)
        })
    }

    fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        use verification_sessions::Column;
        self.rt.block_on(async {
            let txn = self.db.begin().await.map_err(|e| write_err("begin cleanup", e))?;
            let ids: Vec<i64> = verification_sessions::Entity::find()
                .filter(Column::Status.is_in(TERMINAL_STATUSES))
                .filter(Column::CompletedAt.lt(fmt_ts(older_than)))
                .all(&txn)
                .await
                .map_err(|e| read_err("list old sessions", e))?
                .into_iter()
                .map(|m| m.id)
                .collect();
            if !ids.is_empty() {
                documents::Entity::delete_many()
                    .filter(documents::Column::SessionId.is_in(ids.clone()))
                    .exec(&txn)
                    .await
                    .map_err(|e| write_err("delete documents", e))?;
                live_images::Entity::delete_many()
                    .filter(live_images::Column::SessionId.is_in(ids.clone()))
                    .exec(&txn)
                    .await
                    .map_err(|e| write_err("delete live images", e))?;
                verification_results::Entity::delete_many()
                    .filter(verification_results::Column::SessionId.is_in(ids.clone()))
                    .exec(&txn)
                    .await
                    .map_err(|e| write_err("delete results", e))?;
                verification_sessions::Entity::delete_many()
                    .filter(Column::Id.is_in(ids.clone()))
                    .exec(&txn)
                    .await
                    .map_err(|e| write_err("delete sessions", e))?;
            }
            txn.commit().await.map_err(|e| write_err("commit cleanup", e))?;
            info!("Removed {} old session(s) (cutoff: {})", ids.len(), older_than.to_rfc3339());
            Ok(ids.len())
        })
    }
}
