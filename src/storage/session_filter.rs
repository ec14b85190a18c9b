//! Helpers for building `SessionFilter` values.
//!
//! This module re-exports `SessionFilter` and provides convenience builders
//! for common query criteria.

use crate::session_management::SessionStatus;

pub use crate::storage::types::SessionFilter;

/// Build a `SessionFilter` that matches every session of one user.
pub fn by_user(user_id: i64) -> SessionFilter {
    SessionFilter { user_id: Some(user_id), ..Default::default() }
}

/// Build a `SessionFilter` that matches sessions in the given status.
pub fn by_status(status: SessionStatus) -> SessionFilter {
    SessionFilter { status: Some(status), ..Default::default() }
}
