//! Ids for domains and certificate records: snowflakes rendered as decimal
//! strings, so they sort by creation time.

use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Largest machine or node id a snowflake can carry.
pub const MAX_WORKER_PART: i32 = 31;

/// Identity used when nothing called [`init`] before the first id.
const FALLBACK_WORKER: (i32, i32) = (1, 1);

static BUCKET: OnceLock<Mutex<SnowflakeIdBucket>> = OnceLock::new();

/// Pins the process to one `(machine_id, node_id)` pair, each clamped to
/// `0..=MAX_WORKER_PART`.
///
/// Only the first call, or the first [`next_id`], fixes the identity. Later
/// calls leave the running bucket alone so its sequence never restarts, and
/// return `false`.
pub fn init(machine_id: i32, node_id: i32) -> bool {
    let mut installed = false;
    BUCKET.get_or_init(|| {
        installed = true;
        Mutex::new(SnowflakeIdBucket::new(
            machine_id.clamp(0, MAX_WORKER_PART),
            node_id.clamp(0, MAX_WORKER_PART),
        ))
    });
    installed
}

pub fn next_id() -> String {
    let bucket = BUCKET.get_or_init(|| {
        let (machine_id, node_id) = FALLBACK_WORKER;
        Mutex::new(SnowflakeIdBucket::new(machine_id, node_id))
    });
    let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
    bucket.get_id().to_string()
}
