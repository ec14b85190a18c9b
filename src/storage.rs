//! Storage subsystem
//!
//! This module provides the record store for users, verification sessions
//! and their children, and the artifact store for uploaded files.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: shared data types used by storage backends.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `memory_storage`: in-process implementation for tests and embedding.
//! - `file_storage`: filesystem store for uploaded ID documents and live images.
//! - `session_filter`: helpers to build session queries.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod memory_storage;
pub mod session_filter;
pub mod storage_trait;
pub mod types;
