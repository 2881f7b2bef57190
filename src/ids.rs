//! Time-ordered identifiers and timestamps.
//!
//! All persistent identifiers are UUIDv7 so lexicographic order on the
//! identifier approximates chronological order; this is relied on as a
//! secondary sort key for stable pagination.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
