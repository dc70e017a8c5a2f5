//! Prefixed ID generation and validation.
//!
//! Generated IDs use a `prefix_` followed by a UUIDv7 (time-ordered), so
//! session folders sort by creation time. Client-supplied IDs (point IDs,
//! explicit session IDs) become directory names and are validated here.

use uuid::Uuid;

/// Longest accepted client-supplied ID.
pub const MAX_ID_LEN: usize = 128;

/// Generate a prefixed ID using UUIDv7.
fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a session ID: `ses_<uuid7>`
pub fn session_id() -> String {
    prefixed_id("ses")
}

/// Whether `id` is safe to use as a single path component.
///
/// ASCII letters, digits, `-` and `_` only; no dots, so `.` and `..` and
/// hidden names are impossible.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
