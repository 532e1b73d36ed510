//! Identifier utilities

use uuid::Uuid;

/// Length of the short hex ids used for jobs
pub const SHORT_ID_LEN: usize = 12;

/// Generate a short opaque id: the first 12 hex characters of a UUIDv4
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}

/// Whether `s` looks like an id produced by [`short_id`]
pub fn is_short_id(s: &str) -> bool {
    s.len() == SHORT_ID_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
