//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `users`: identity records
//! - `verification_sessions`: one row per verification attempt
//! - `documents`: uploaded ID documents and their OCR outcome
//! - `live_images`: live captures with liveness and face-match outcomes
//! - `verification_results`: append-only finalize outcomes
//!
//! Timestamps are RFC3339 strings with fixed microsecond precision so that
//! string comparison orders them chronologically. JSON columns are text.

/// Users table entity model.
pub mod users {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(unique)]
        pub email: String,
        pub full_name: String,
        pub phone: Option<String>,
        pub created_at: String,
        pub is_verified: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Verification sessions table entity model.
pub mod verification_sessions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "verification_sessions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Foreign key to `users.id`
        pub user_id: i64,
        #[sea_orm(unique)]
        pub session_token: String,
        /// Session status as snake_case string
        pub status: String,
        pub created_at: String,
        pub completed_at: Option<String>,
        pub ocr_completed: bool,
        pub liveness_completed: bool,
        pub face_match_completed: bool,
        pub verification_passed: bool,
        pub failure_reason: Option<String>,
        pub ocr_document_id: Option<i64>,
        pub liveness_image_id: Option<i64>,
        pub face_match_image_id: Option<i64>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a user
        #[sea_orm(
            belongs_to = "super::users::Entity",
            from = "Column::UserId",
            to = "super::users::Column::Id",
            on_delete = "Cascade"
        )]
        User,
    }

    impl Related<super::users::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::User.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Documents table entity model.
pub mod documents {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "documents")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Foreign key to `verification_sessions.id`
        pub session_id: i64,
        pub file_path: String,
        pub file_name: String,
        pub file_type: String,
        pub file_size: i64,
        pub uploaded_at: String,
        pub extracted_data_encrypted: Option<Vec<u8>>,
        pub ocr_confidence: Option<f64>,
        pub is_valid_document: bool,
        pub document_type: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a session
        #[sea_orm(
            belongs_to = "super::verification_sessions::Entity",
            from = "Column::SessionId",
            to = "super::verification_sessions::Column::Id",
            on_delete = "Cascade"
        )]
        Session,
    }

    impl Related<super::verification_sessions::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Session.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Live images table entity model.
pub mod live_images {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "live_images")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Foreign key to `verification_sessions.id`
        pub session_id: i64,
        pub file_path: String,
        pub captured_at: String,
        pub is_live: bool,
        pub liveness_confidence: Option<f64>,
        /// JSON
        pub liveness_details: Option<String>,
        pub faces_detected: i32,
        /// JSON array of face boxes
        pub face_coordinates: String,
        pub face_match_score: Option<f64>,
        /// JSON
        pub face_match_details: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a session
        #[sea_orm(
            belongs_to = "super::verification_sessions::Entity",
            from = "Column::SessionId",
            to = "super::verification_sessions::Column::Id",
            on_delete = "Cascade"
        )]
        Session,
    }

    impl Related<super::verification_sessions::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Session.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Verification results table entity model.
pub mod verification_results {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "verification_results")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        /// Foreign key to `verification_sessions.id`
        pub session_id: i64,
        pub created_at: String,
        pub face_match_score: f64,
        pub face_match_threshold: f64,
        pub face_match_passed: bool,
        pub overall_score: f64,
        /// Risk level as snake_case string
        pub risk_level: String,
        pub verification_passed: bool,
        /// JSON
        pub verification_details: String,
        pub processing_time_ms: i64,
        pub authoritative: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a session
        #[sea_orm(
            belongs_to = "super::verification_sessions::Entity",
            from = "Column::SessionId",
            to = "super::verification_sessions::Column::Id",
            on_delete = "Cascade"
        )]
        Session,
    }

    impl Related<super::verification_sessions::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Session.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
