//! KV side-channel for the two non-relational blobs (loop_config, loop_state)
//! and the cached learning stats. Writes are spaced per key.

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use diesel::sqlite::SqliteConnection;

use crate::models::NewKvEntry;

pub const LOOP_CONFIG_KEY: &str = "loop_config";
pub const LOOP_STATE_KEY: &str = "loop_state";
pub const LEARNING_STATS_KEY: &str = "learning:stats";

const MIN_WRITE_INTERVAL: Duration = Duration::from_secs(1);

/// One write per second per key; callers see a typed rejection and must space
/// their saves.
pub struct KvWriteLimiter {
    last: Mutex<HashMap<String, Instant>>,
}

impl KvWriteLimiter {
    pub fn new() -> Self {
        KvWriteLimiter {
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false when the key was written less than a second ago.
    /// A successful check records the write slot.
    pub fn check(&self, key: &str) -> bool {
        let mut last = self.last.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        if let Some(prev) = last.get(key) {
            if now.duration_since(*prev) < MIN_WRITE_INTERVAL {
                return false;
            }
        }
        last.insert(key.to_string(), now);
        true
    }
}

impl Default for KvWriteLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn get_raw(conn: &mut SqliteConnection, entry_key: &str) -> Result<Option<String>> {
    use crate::schema::kv_store::dsl;
    let value = dsl::kv_store
        .filter(dsl::key.eq(entry_key))
        .select(dsl::value)
        .first::<String>(conn)
        .optional()?;
    Ok(value)
}

pub fn get_json<T: DeserializeOwned>(conn: &mut SqliteConnection, entry_key: &str) -> Result<Option<T>> {
    match get_raw(conn, entry_key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn put_raw(conn: &mut SqliteConnection, entry_key: &str, raw: &str) -> Result<()> {
    use crate::schema::kv_store::dsl;

    let exists = dsl::kv_store
        .filter(dsl::key.eq(entry_key))
        .select(dsl::key)
        .first::<String>(conn)
        .optional()?;

    if exists.is_some() {
        diesel::update(dsl::kv_store.filter(dsl::key.eq(entry_key)))
            .set((
                dsl::value.eq(raw),
                dsl::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
    } else {
        diesel::insert_into(dsl::kv_store)
            .values(NewKvEntry {
                key: entry_key.to_string(),
                value: raw.to_string(),
            })
            .execute(conn)?;
    }
    Ok(())
}

pub fn put_json<T: Serialize>(conn: &mut SqliteConnection, entry_key: &str, value: &T) -> Result<()> {
    put_raw(conn, entry_key, &serde_json::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_spaces_writes() {
        let limiter = KvWriteLimiter::new();
        assert!(limiter.check("loop_state"));
        assert!(!limiter.check("loop_state"));
        // Other keys have their own slot.
        assert!(limiter.check("loop_config"));
    }
}
