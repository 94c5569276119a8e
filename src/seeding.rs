use crate::db::DbPool;
use crate::models::{LoopConfig, LoopState};
use crate::services::kv::{self, LOOP_CONFIG_KEY, LOOP_STATE_KEY};
use anyhow::Result;

/// Seeds the KV blobs the loop controller reads on its first tick. Existing
/// values are left alone.
pub fn seed_defaults(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get()?;

    if kv::get_raw(&mut conn, LOOP_CONFIG_KEY)?.is_none() {
        kv::put_json(&mut conn, LOOP_CONFIG_KEY, &LoopConfig::default())?;
        tracing::info!("Seeded default loop config (disabled)");
    }

    if kv::get_raw(&mut conn, LOOP_STATE_KEY)?.is_none() {
        kv::put_json(&mut conn, LOOP_STATE_KEY, &LoopState::default())?;
        tracing::info!("Seeded empty loop state");
    }

    Ok(())
}
